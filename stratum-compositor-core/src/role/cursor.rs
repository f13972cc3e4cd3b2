//! Surfaces that follow the pointer: cursor images and drag icons.
//!
//! Neither role takes part in layout or input. Their position is relative to
//! the pointer location; committed buffer offsets move the image against it.

use crate::geometry::Point;
use crate::surface::CommitPreview;

use super::{CommitReaction, RoleBehavior, RoleContext, RoleKind};

#[derive(Debug, Default)]
pub struct CursorRole {
    hotspot: Point,
    offset: Point,
}

impl CursorRole {
    pub fn new(hotspot: Point) -> Self {
        Self { hotspot, offset: Point::default() }
    }

    /// Hotspot relative to the image, including committed buffer offsets.
    pub fn hotspot(&self) -> Point {
        self.hotspot - self.offset
    }

    /// `set_cursor` changes the hotspot immediately.
    pub(crate) fn set_hotspot(&mut self, hotspot: Point) {
        self.hotspot = hotspot;
    }
}

impl RoleBehavior for CursorRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Cursor
    }

    fn role_position(&self) -> Point {
        -self.hotspot()
    }

    fn on_commit(&mut self, _ctx: &mut RoleContext<'_>, preview: &CommitPreview) -> CommitReaction {
        self.offset = preview.buffer_offset;
        CommitReaction::CURSOR_IMAGE
    }
}

#[derive(Debug, Default)]
pub struct DragIconRole {
    offset: Point,
}

impl DragIconRole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> Point {
        self.offset
    }
}

impl RoleBehavior for DragIconRole {
    fn kind(&self) -> RoleKind {
        RoleKind::DragIcon
    }

    fn role_position(&self) -> Point {
        self.offset
    }

    fn on_commit(&mut self, _ctx: &mut RoleContext<'_>, preview: &CommitPreview) -> CommitReaction {
        if self.offset == preview.buffer_offset {
            return CommitReaction::empty();
        }
        self.offset = preview.buffer_offset;
        CommitReaction::GEOMETRY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventQueue;
    use crate::geometry::{Size, Transform};
    use crate::seat::SerialCounter;
    use crate::surface::SurfaceId;
    use stratum_buffer_manager::ClientId;

    fn preview(offset: Point) -> CommitPreview {
        CommitPreview {
            has_buffer: true,
            buffer_size: Some(Size::new(24, 24)),
            scale: 1,
            transform: Transform::Normal,
            surface_size: Size::new(24, 24),
            buffer_offset: offset,
        }
    }

    #[test]
    fn test_cursor_position_is_negated_hotspot() {
        let mut serials = SerialCounter::new();
        let mut events = EventQueue::new();
        let mut ctx = RoleContext {
            surface: SurfaceId::new(0, 1),
            client: ClientId::new(1),
            serials: &mut serials,
            events: &mut events,
        };
        let mut cursor = CursorRole::new(Point::new(4, 6));
        assert_eq!(cursor.role_position(), Point::new(-4, -6));

        assert_eq!(cursor.on_commit(&mut ctx, &preview(Point::new(1, 2))), CommitReaction::CURSOR_IMAGE);
        assert_eq!(cursor.hotspot(), Point::new(3, 4));
        cursor.set_hotspot(Point::new(0, 0));
        assert_eq!(cursor.role_position(), Point::new(1, 2));
        assert!(events.is_empty());
    }

    #[test]
    fn test_drag_icon_follows_buffer_offset() {
        let mut serials = SerialCounter::new();
        let mut events = EventQueue::new();
        let mut ctx = RoleContext {
            surface: SurfaceId::new(0, 1),
            client: ClientId::new(1),
            serials: &mut serials,
            events: &mut events,
        };
        let mut icon = DragIconRole::new();
        assert_eq!(icon.on_commit(&mut ctx, &preview(Point::new(-8, -8))), CommitReaction::GEOMETRY);
        assert_eq!(icon.role_position(), Point::new(-8, -8));
        assert!(icon.on_commit(&mut ctx, &preview(Point::new(-8, -8))).is_empty());
    }
}
