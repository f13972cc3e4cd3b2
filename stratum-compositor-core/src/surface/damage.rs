//! Surface damage and the conversion between surface and buffer coordinates.
//!
//! Surface-local coordinates are logical pixels of the surface. Buffer-local
//! coordinates are pixels of the attached buffer, which is `scale` times larger
//! and rotated/flipped by the buffer transform.

use crate::geometry::{Rectangle, Size, Transform};
use crate::region::Region;

/// Maps a surface-local rectangle into buffer-local coordinates.
///
/// `surface_size` is the logical size of the surface.
pub fn surface_to_buffer(rect: Rectangle, scale: i32, transform: Transform, surface_size: Size) -> Rectangle {
    let scale = scale.max(1);
    let scaled_container = Size::new(surface_size.width * scale, surface_size.height * scale);
    rect.scale_up(scale).transform(transform, scaled_container)
}

/// Maps a buffer-local rectangle into surface-local coordinates, rounding outward.
pub fn buffer_to_surface(rect: Rectangle, scale: i32, transform: Transform, buffer_size: Size) -> Rectangle {
    rect.transform(transform.invert(), buffer_size).scale_down(scale.max(1))
}

/// Visible damage of a surface in surface-local coordinates.
///
/// Each applied commit merges its damage into the tracked region; it is only
/// cleared when the compositor propagates it to the outputs.
#[derive(Debug, Clone)]
pub struct DamageTracker {
    visible: Region,
    max_rects: usize,
}

impl DamageTracker {
    pub fn new(max_rects: usize) -> Self {
        Self { visible: Region::new(), max_rects: max_rects.max(1) }
    }

    /// Merges the damage of one commit.
    ///
    /// Buffer damage is converted with the state that is being committed.
    /// Everything is clipped to the surface bounds.
    pub fn merge_commit(
        &mut self,
        surface_damage: &[Rectangle],
        buffer_damage: &[Rectangle],
        scale: i32,
        transform: Transform,
        buffer_size: Option<Size>,
    ) {
        let Some(buffer_size) = buffer_size else {
            return;
        };
        let surface_size = super::logical_size(Some(buffer_size), scale, transform);
        let bounds = Rectangle::from_loc_and_size(Default::default(), surface_size);

        let converted = buffer_damage
            .iter()
            .map(|rect| buffer_to_surface(*rect, scale, transform, buffer_size));
        for rect in surface_damage.iter().copied().chain(converted) {
            let clipped = rect.intersection(&bounds);
            if !clipped.is_empty() {
                self.visible.add(clipped);
            }
        }
        self.visible.simplify(self.max_rects);
    }

    /// Damages the whole surface, e.g. after its size changed.
    pub fn add_full(&mut self, surface_size: Size) {
        self.visible.add(Rectangle::from_loc_and_size(Default::default(), surface_size));
        self.visible.simplify(self.max_rects);
    }

    pub fn region(&self) -> &Region {
        &self.visible
    }

    pub fn take(&mut self) -> Region {
        std::mem::take(&mut self.visible)
    }

    pub fn clear(&mut self) {
        self.visible.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_scale_two_doubles_damage() {
        let buffer = surface_to_buffer(Rectangle::new(0, 0, 10, 10), 2, Transform::Normal, Size::new(100, 100));
        assert_eq!(buffer, Rectangle::new(0, 0, 20, 20));
    }

    #[rstest]
    #[case(1, Transform::Normal)]
    #[case(2, Transform::Rotated90)]
    #[case(3, Transform::Flipped270)]
    #[case(2, Transform::Rotated180)]
    fn test_damage_round_trip(#[case] scale: i32, #[case] transform: Transform) {
        let surface_size = Size::new(120, 80);
        let buffer_size = transform.invert().transform_size(Size::new(120 * scale, 80 * scale));
        let rect = Rectangle::new(13, 7, 21, 9);
        let buffer = surface_to_buffer(rect, scale, transform, surface_size);
        assert!(Rectangle::from_loc_and_size(Default::default(), buffer_size).contains_rect(&buffer));
        assert_eq!(buffer_to_surface(buffer, scale, transform, buffer_size), rect);
    }

    #[test]
    fn test_merge_commit_converts_and_clips() {
        let mut tracker = DamageTracker::new(64);
        tracker.merge_commit(
            &[Rectangle::new(90, 0, 50, 10)],
            &[Rectangle::new(0, 0, 20, 20)],
            2,
            Transform::Normal,
            Some(Size::new(200, 200)),
        );
        assert!(tracker.region().contains_point(crate::geometry::Point::new(9, 9)));
        assert_eq!(tracker.region().extents(), Rectangle::new(0, 0, 100, 10));
    }

    #[test]
    fn test_merge_accumulates_across_commits() {
        let mut tracker = DamageTracker::new(64);
        let size = Some(Size::new(100, 100));
        tracker.merge_commit(&[Rectangle::new(0, 0, 10, 10)], &[], 1, Transform::Normal, size);
        tracker.merge_commit(&[Rectangle::new(50, 50, 10, 10)], &[], 1, Transform::Normal, size);
        assert_eq!(tracker.region().area(), 200);
        let taken = tracker.take();
        assert_eq!(taken.len(), 2);
        assert!(tracker.region().is_empty());
    }

    #[test]
    fn test_overflow_collapses_to_bounding_box() {
        let mut tracker = DamageTracker::new(2);
        let rects: Vec<_> = (0..4).map(|i| Rectangle::new(i * 10, 0, 5, 5)).collect();
        tracker.merge_commit(&rects, &[], 1, Transform::Normal, Some(Size::new(100, 100)));
        assert_eq!(tracker.region().rects(), &[Rectangle::new(0, 0, 35, 5)]);
    }
}
