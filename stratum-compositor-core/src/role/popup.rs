//! Popups and the positioner rules that place them.
//!
//! A popup is placed relative to its parent from a [`Positioner`]: an anchor
//! rectangle on the parent, the point of that rectangle to anchor to, the
//! direction to grow in and the adjustments allowed when the result leaves the
//! constraint area. [`compute_popup_geometry`] is a pure function of those
//! inputs, so the same positioner and bounds always land on the same spot.

use std::collections::VecDeque;

use bitflags::bitflags;

use crate::error::ProtocolError;
use crate::events::CompositorEvent;
use crate::geometry::{Point, Rectangle, Size};
use crate::seat::Serial;
use crate::surface::{CommitPreview, SurfaceId};

use super::{CommitReaction, RoleBehavior, RoleContext, RoleKind};

/// A point on the anchor rectangle, or a growth direction when used as gravity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Anchor {
    #[default]
    None,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    BottomLeft,
    TopRight,
    BottomRight,
}

/// The direction a popup extends from its anchor point.
pub type Gravity = Anchor;

impl Anchor {
    fn has_left(self) -> bool {
        matches!(self, Anchor::Left | Anchor::TopLeft | Anchor::BottomLeft)
    }

    fn has_right(self) -> bool {
        matches!(self, Anchor::Right | Anchor::TopRight | Anchor::BottomRight)
    }

    fn has_top(self) -> bool {
        matches!(self, Anchor::Top | Anchor::TopLeft | Anchor::TopRight)
    }

    fn has_bottom(self) -> bool {
        matches!(self, Anchor::Bottom | Anchor::BottomLeft | Anchor::BottomRight)
    }

    fn compose(left: bool, right: bool, top: bool, bottom: bool) -> Anchor {
        match (left, right, top, bottom) {
            (true, _, true, _) => Anchor::TopLeft,
            (true, _, _, true) => Anchor::BottomLeft,
            (_, true, true, _) => Anchor::TopRight,
            (_, true, _, true) => Anchor::BottomRight,
            (true, _, _, _) => Anchor::Left,
            (_, true, _, _) => Anchor::Right,
            (_, _, true, _) => Anchor::Top,
            (_, _, _, true) => Anchor::Bottom,
            _ => Anchor::None,
        }
    }

    pub fn flip_x(self) -> Anchor {
        Anchor::compose(self.has_right(), self.has_left(), self.has_top(), self.has_bottom())
    }

    pub fn flip_y(self) -> Anchor {
        Anchor::compose(self.has_left(), self.has_right(), self.has_bottom(), self.has_top())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConstraintAdjustment: u32 {
        const SLIDE_X = 1;
        const SLIDE_Y = 1 << 1;
        const FLIP_X = 1 << 2;
        const FLIP_Y = 1 << 3;
        const RESIZE_X = 1 << 4;
        const RESIZE_Y = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Positioner {
    pub size: Size,
    /// Relative to the parent's window geometry.
    pub anchor_rect: Rectangle,
    pub anchor: Anchor,
    pub gravity: Gravity,
    pub constraint_adjustment: ConstraintAdjustment,
    pub offset: Point,
    /// Re-run the placement when the parent moves or the constraints change.
    pub reactive: bool,
}

impl Positioner {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.size.width <= 0 || self.size.height <= 0 {
            return Err(ProtocolError::InvalidPositioner(format!("size {} must be positive", self.size)));
        }
        if self.anchor_rect.is_empty() {
            return Err(ProtocolError::InvalidPositioner(format!(
                "anchor rectangle {} is empty",
                self.anchor_rect
            )));
        }
        Ok(())
    }

    fn unconstrained(&self, anchor: Anchor, gravity: Gravity) -> Rectangle {
        let rect = self.anchor_rect;
        let ax = if anchor.has_left() {
            rect.x
        } else if anchor.has_right() {
            rect.right()
        } else {
            rect.x + rect.width / 2
        };
        let ay = if anchor.has_top() {
            rect.y
        } else if anchor.has_bottom() {
            rect.bottom()
        } else {
            rect.y + rect.height / 2
        };

        let Size { width, height } = self.size;
        let x = if gravity.has_left() {
            ax - width
        } else if gravity.has_right() {
            ax
        } else {
            ax - width / 2
        };
        let y = if gravity.has_top() {
            ay - height
        } else if gravity.has_bottom() {
            ay
        } else {
            ay - height / 2
        };
        Rectangle::new(x + self.offset.x, y + self.offset.y, width, height)
    }
}

fn fits_x(geometry: &Rectangle, bounds: &Rectangle) -> bool {
    geometry.x >= bounds.x && geometry.right() <= bounds.right()
}

fn fits_y(geometry: &Rectangle, bounds: &Rectangle) -> bool {
    geometry.y >= bounds.y && geometry.bottom() <= bounds.bottom()
}

/// Places a popup inside `bounds`, both relative to the parent's window geometry.
///
/// Each axis is handled on its own: flip if allowed and the flipped position
/// fits, then slide, then shrink. An axis with no applicable adjustment keeps
/// its unconstrained position.
pub fn compute_popup_geometry(positioner: &Positioner, bounds: Rectangle) -> Rectangle {
    let adjust = positioner.constraint_adjustment;
    let mut geometry = positioner.unconstrained(positioner.anchor, positioner.gravity);

    if !fits_x(&geometry, &bounds) {
        if adjust.contains(ConstraintAdjustment::FLIP_X) {
            let flipped = positioner.unconstrained(positioner.anchor.flip_x(), positioner.gravity.flip_x());
            if fits_x(&flipped, &bounds) {
                geometry.x = flipped.x;
            }
        }
        if !fits_x(&geometry, &bounds) && adjust.contains(ConstraintAdjustment::SLIDE_X) {
            if geometry.right() > bounds.right() {
                geometry.x = bounds.right() - geometry.width;
            }
            if geometry.x < bounds.x {
                geometry.x = bounds.x;
            }
        }
        if !fits_x(&geometry, &bounds) && adjust.contains(ConstraintAdjustment::RESIZE_X) {
            let left = geometry.x.max(bounds.x);
            let right = geometry.right().min(bounds.right());
            if right > left {
                geometry.x = left;
                geometry.width = right - left;
            }
        }
    }

    if !fits_y(&geometry, &bounds) {
        if adjust.contains(ConstraintAdjustment::FLIP_Y) {
            let flipped = positioner.unconstrained(positioner.anchor.flip_y(), positioner.gravity.flip_y());
            if fits_y(&flipped, &bounds) {
                geometry.y = flipped.y;
            }
        }
        if !fits_y(&geometry, &bounds) && adjust.contains(ConstraintAdjustment::SLIDE_Y) {
            if geometry.bottom() > bounds.bottom() {
                geometry.y = bounds.bottom() - geometry.height;
            }
            if geometry.y < bounds.y {
                geometry.y = bounds.y;
            }
        }
        if !fits_y(&geometry, &bounds) && adjust.contains(ConstraintAdjustment::RESIZE_Y) {
            let top = geometry.y.max(bounds.y);
            let bottom = geometry.bottom().min(bounds.bottom());
            if bottom > top {
                geometry.y = top;
                geometry.height = bottom - top;
            }
        }
    }

    geometry
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupConfigure {
    pub serial: Serial,
    pub geometry: Rectangle,
    pub reposition_token: Option<u32>,
}

#[derive(Debug)]
pub struct PopupRole {
    parent: SurfaceId,
    positioner: Positioner,
    bounds: Rectangle,
    geometry: Rectangle,
    pending_configures: VecDeque<PopupConfigure>,
    acked: Option<PopupConfigure>,
    configured: bool,
    ever_acked: bool,
    committed: bool,
    had_buffer: bool,
    grabbed: bool,
    dismissed: bool,
    pending_window_geometry: Option<Rectangle>,
    window_geometry: Option<Rectangle>,
}

impl PopupRole {
    /// `bounds` is the constraint area relative to the parent's window geometry.
    pub fn new(parent: SurfaceId, positioner: Positioner, bounds: Rectangle) -> Result<Self, ProtocolError> {
        positioner.validate()?;
        Ok(Self {
            parent,
            positioner,
            bounds,
            geometry: compute_popup_geometry(&positioner, bounds),
            pending_configures: VecDeque::new(),
            acked: None,
            configured: false,
            ever_acked: false,
            committed: false,
            had_buffer: false,
            grabbed: false,
            dismissed: false,
            pending_window_geometry: None,
            window_geometry: None,
        })
    }

    pub fn parent(&self) -> SurfaceId {
        self.parent
    }

    pub fn positioner(&self) -> &Positioner {
        &self.positioner
    }

    pub fn bounds(&self) -> Rectangle {
        self.bounds
    }

    /// Committed geometry relative to the parent's window geometry.
    pub fn geometry(&self) -> Rectangle {
        self.geometry
    }

    pub fn window_geometry(&self) -> Option<Rectangle> {
        self.window_geometry
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    pub fn is_dismissed(&self) -> bool {
        self.dismissed
    }

    pub fn has_committed(&self) -> bool {
        self.committed
    }

    pub fn pending_configures(&self) -> impl Iterator<Item = &PopupConfigure> {
        self.pending_configures.iter()
    }

    pub(crate) fn set_grabbed(&mut self) {
        self.grabbed = true;
    }

    pub fn set_window_geometry(&mut self, surface: SurfaceId, geometry: Rectangle) -> Result<(), ProtocolError> {
        if geometry.is_empty() {
            return Err(ProtocolError::InvalidGeometry {
                surface,
                width: geometry.width,
                height: geometry.height,
            });
        }
        self.pending_window_geometry = Some(geometry);
        Ok(())
    }

    fn send_configure(&mut self, ctx: &mut RoleContext<'_>, reposition_token: Option<u32>) -> Serial {
        let geometry = compute_popup_geometry(&self.positioner, self.bounds);
        let configure = PopupConfigure { serial: ctx.serials.next_serial(), geometry, reposition_token };
        self.pending_configures.push_back(configure);
        self.configured = true;
        ctx.events.push(CompositorEvent::PopupConfigure {
            client: ctx.client,
            surface: ctx.surface,
            serial: configure.serial,
            geometry,
            reposition_token,
        });
        configure.serial
    }

    /// Replaces the positioner and sends a configure carrying `token`.
    pub fn reposition(
        &mut self,
        positioner: Positioner,
        token: u32,
        ctx: &mut RoleContext<'_>,
    ) -> Result<Serial, ProtocolError> {
        positioner.validate()?;
        self.positioner = positioner;
        Ok(self.send_configure(ctx, Some(token)))
    }

    /// The constraint area changed, e.g. because the parent moved. Reactive
    /// popups are re-placed; others keep their geometry.
    pub fn update_bounds(&mut self, bounds: Rectangle, ctx: &mut RoleContext<'_>) {
        if self.bounds == bounds {
            return;
        }
        self.bounds = bounds;
        if self.positioner.reactive && self.configured && !self.dismissed {
            let placed = compute_popup_geometry(&self.positioner, bounds);
            if placed != self.geometry {
                self.send_configure(ctx, None);
            }
        }
    }

    pub fn ack_configure(&mut self, serial: Serial, ctx: &mut RoleContext<'_>) -> Result<(), ProtocolError> {
        let index = self
            .pending_configures
            .iter()
            .position(|c| c.serial == serial)
            .ok_or(ProtocolError::InvalidSerial { surface: ctx.surface, serial })?;
        self.acked = self.pending_configures.drain(..=index).last();
        self.ever_acked = true;
        Ok(())
    }

    /// Tells the client the popup was dismissed. It stays unmapped until destroyed.
    pub fn dismiss(&mut self, ctx: &mut RoleContext<'_>) {
        if self.dismissed {
            return;
        }
        tracing::debug!(popup = %ctx.surface, parent = %self.parent, "Dismissing popup");
        self.dismissed = true;
        self.pending_configures.clear();
        self.acked = None;
        ctx.events.push(CompositorEvent::PopupDone { client: ctx.client, surface: ctx.surface });
    }

}

impl RoleBehavior for PopupRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Popup
    }

    fn role_position(&self) -> Point {
        let offset = self.window_geometry.map(|g| g.loc()).unwrap_or_default();
        self.geometry.loc() - offset
    }

    fn check_commit(&self, surface: SurfaceId, preview: &CommitPreview) -> Result<(), ProtocolError> {
        if preview.has_buffer && !self.ever_acked {
            return Err(ProtocolError::UnconfiguredBuffer { surface });
        }
        Ok(())
    }

    fn can_map(&self) -> bool {
        !self.dismissed
    }

    fn on_commit(&mut self, ctx: &mut RoleContext<'_>, preview: &CommitPreview) -> CommitReaction {
        let mut reaction = CommitReaction::empty();
        self.committed = true;
        if self.dismissed {
            return reaction;
        }
        if self.had_buffer && !preview.has_buffer {
            tracing::debug!(popup = %ctx.surface, "Popup unmapped, resetting");
            self.had_buffer = false;
            self.acked = None;
            self.ever_acked = false;
            self.pending_configures.clear();
            self.send_configure(ctx, None);
            return CommitReaction::RESET;
        }

        if self.window_geometry != self.pending_window_geometry {
            self.window_geometry = self.pending_window_geometry;
            reaction |= CommitReaction::GEOMETRY;
        }
        if let Some(acked) = self.acked.take() {
            if acked.geometry != self.geometry {
                self.geometry = acked.geometry;
                reaction |= CommitReaction::GEOMETRY;
            }
        }
        self.had_buffer = preview.has_buffer;

        if !self.configured {
            self.send_configure(ctx, None);
        }
        reaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventQueue;
    use crate::geometry::Transform;
    use crate::seat::SerialCounter;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use stratum_buffer_manager::ClientId;

    fn positioner(anchor: Anchor, gravity: Gravity, adjust: ConstraintAdjustment) -> Positioner {
        Positioner {
            size: Size::new(100, 50),
            anchor_rect: Rectangle::new(150, 20, 20, 10),
            anchor,
            gravity,
            constraint_adjustment: adjust,
            offset: Point::default(),
            reactive: false,
        }
    }

    const BOUNDS: Rectangle = Rectangle::new(0, 0, 200, 200);

    #[rstest]
    #[case(Anchor::BottomLeft, Anchor::BottomRight, Rectangle::new(150, 30, 100, 50))]
    #[case(Anchor::TopLeft, Anchor::TopLeft, Rectangle::new(50, -30, 100, 50))]
    #[case(Anchor::None, Anchor::None, Rectangle::new(110, 0, 100, 50))]
    fn test_unconstrained_placement(#[case] anchor: Anchor, #[case] gravity: Gravity, #[case] expected: Rectangle) {
        let p = positioner(anchor, gravity, ConstraintAdjustment::empty());
        assert_eq!(compute_popup_geometry(&p, BOUNDS), expected);
    }

    #[test]
    fn test_flip_x_when_flipped_position_fits() {
        let p = positioner(Anchor::BottomRight, Anchor::BottomRight, ConstraintAdjustment::FLIP_X);
        // Unflipped: x = 170..270 overflows; flipped: anchor left (150), grow left.
        assert_eq!(compute_popup_geometry(&p, BOUNDS), Rectangle::new(50, 30, 100, 50));
    }

    #[test]
    fn test_slide_x_keeps_popup_inside() {
        let p = positioner(Anchor::BottomRight, Anchor::BottomRight, ConstraintAdjustment::SLIDE_X);
        assert_eq!(compute_popup_geometry(&p, BOUNDS), Rectangle::new(100, 30, 100, 50));
    }

    #[test]
    fn test_resize_y_shrinks_to_bounds() {
        let mut p = positioner(Anchor::BottomLeft, Anchor::BottomRight, ConstraintAdjustment::RESIZE_Y);
        p.anchor_rect = Rectangle::new(10, 180, 10, 10);
        assert_eq!(compute_popup_geometry(&p, BOUNDS), Rectangle::new(10, 190, 100, 10));
    }

    #[test]
    fn test_placement_is_idempotent() {
        let adjust = ConstraintAdjustment::all();
        let p = positioner(Anchor::BottomRight, Anchor::BottomRight, adjust);
        let first = compute_popup_geometry(&p, BOUNDS);
        assert_eq!(compute_popup_geometry(&p, BOUNDS), first);
        assert!(BOUNDS.contains_rect(&first));
    }

    #[test]
    fn test_anchor_flips() {
        assert_eq!(Anchor::TopLeft.flip_x(), Anchor::TopRight);
        assert_eq!(Anchor::TopLeft.flip_y(), Anchor::BottomLeft);
        assert_eq!(Anchor::Top.flip_x(), Anchor::Top);
        assert_eq!(Anchor::None.flip_y(), Anchor::None);
    }

    #[test]
    fn test_positioner_validation() {
        let mut p = positioner(Anchor::None, Anchor::None, ConstraintAdjustment::empty());
        p.size = Size::new(0, 10);
        assert!(matches!(p.validate(), Err(ProtocolError::InvalidPositioner(_))));
    }

    fn preview(has_buffer: bool) -> CommitPreview {
        CommitPreview {
            has_buffer,
            buffer_size: has_buffer.then(|| Size::new(100, 50)),
            scale: 1,
            transform: Transform::Normal,
            surface_size: if has_buffer { Size::new(100, 50) } else { Size::default() },
            buffer_offset: Point::default(),
        }
    }

    #[test]
    fn test_configure_ack_commit_cycle_and_dismiss() {
        let mut serials = SerialCounter::new();
        let mut events = EventQueue::new();
        let surface = SurfaceId::new(1, 1);
        let mut ctx = RoleContext { surface, client: ClientId::new(1), serials: &mut serials, events: &mut events };
        let p = positioner(Anchor::BottomLeft, Anchor::BottomRight, ConstraintAdjustment::empty());
        let mut popup = PopupRole::new(SurfaceId::new(0, 1), p, BOUNDS).unwrap();

        assert!(popup.check_commit(surface, &preview(true)).is_err());
        popup.on_commit(&mut ctx, &preview(false));
        let serial = popup.pending_configures().last().unwrap().serial;
        popup.ack_configure(serial, &mut ctx).unwrap();
        popup.check_commit(surface, &preview(true)).unwrap();
        popup.on_commit(&mut ctx, &preview(true));
        assert_eq!(popup.geometry(), Rectangle::new(150, 30, 100, 50));
        assert_eq!(popup.role_position(), Point::new(150, 30));

        popup.dismiss(&mut ctx);
        popup.dismiss(&mut ctx);
        assert!(!popup.can_map());
        let done = events.iter().filter(|e| matches!(e, CompositorEvent::PopupDone { .. })).count();
        assert_eq!(done, 1);
    }

    #[test]
    fn test_reposition_carries_token() {
        let mut serials = SerialCounter::new();
        let mut events = EventQueue::new();
        let surface = SurfaceId::new(1, 1);
        let mut ctx = RoleContext { surface, client: ClientId::new(1), serials: &mut serials, events: &mut events };
        let p = positioner(Anchor::BottomLeft, Anchor::BottomRight, ConstraintAdjustment::empty());
        let mut popup = PopupRole::new(SurfaceId::new(0, 1), p, BOUNDS).unwrap();
        popup.on_commit(&mut ctx, &preview(false));

        let mut moved = p;
        moved.anchor_rect = Rectangle::new(0, 0, 10, 10);
        popup.reposition(moved, 42, &mut ctx).unwrap();
        let last = events.drain().pop().unwrap();
        assert!(matches!(
            last,
            CompositorEvent::PopupConfigure { reposition_token: Some(42), geometry, .. }
                if geometry == Rectangle::new(0, 10, 100, 50)
        ));
    }
}
