//! Regions: sets of pixels stored as disjoint rectangles.
//!
//! Used for damage, input and opaque areas. The rectangles of a [`Region`] never
//! overlap, so the area of a region is the sum of the areas of its rectangles.

use crate::geometry::{Rectangle, Size, Transform};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rectangle>,
}

impl Region {
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    pub fn from_rect(rect: Rectangle) -> Self {
        let mut region = Self::new();
        region.add(rect);
        region
    }

    pub fn from_rects<I: IntoIterator<Item = Rectangle>>(rects: I) -> Self {
        let mut region = Self::new();
        for rect in rects {
            region.add(rect);
        }
        region
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rectangle] {
        &self.rects
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn area(&self) -> i64 {
        self.rects.iter().map(Rectangle::area).sum()
    }

    /// Bounding box of the region, empty for an empty region.
    pub fn extents(&self) -> Rectangle {
        self.rects.iter().fold(Rectangle::default(), |acc, r| acc.union(r))
    }

    pub fn contains_point(&self, point: crate::geometry::Point) -> bool {
        self.rects.iter().any(|r| r.contains(point))
    }

    pub fn intersects_rect(&self, rect: &Rectangle) -> bool {
        self.rects.iter().any(|r| r.intersects(rect))
    }

    /// Adds the parts of `rect` not yet covered.
    pub fn add(&mut self, rect: Rectangle) {
        if rect.is_empty() {
            return;
        }
        let mut pieces = vec![rect];
        for existing in &self.rects {
            pieces = pieces.iter().flat_map(|p| p.subtract(existing)).collect();
            if pieces.is_empty() {
                return;
            }
        }
        self.rects.extend(pieces);
    }

    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add(*rect);
        }
    }

    pub fn subtract(&mut self, rect: &Rectangle) {
        if rect.is_empty() {
            return;
        }
        self.rects = self.rects.iter().flat_map(|r| r.subtract(rect)).collect();
    }

    /// Restricts the region to `clip`.
    pub fn intersect_rect(&mut self, clip: &Rectangle) {
        self.rects = self
            .rects
            .iter()
            .map(|r| r.intersection(clip))
            .filter(|r| !r.is_empty())
            .collect();
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Region {
        Region { rects: self.rects.iter().map(|r| r.translate(dx, dy)).collect() }
    }

    /// Scales every rectangle outward by a fractional factor.
    ///
    /// Scaled rectangles may overlap at shared edges, so the result is rebuilt.
    pub fn scaled(&self, factor: f64) -> Region {
        Region::from_rects(self.rects.iter().map(|r| r.scale_outward(factor)))
    }

    pub fn transformed(&self, transform: Transform, container: Size) -> Region {
        Region { rects: self.rects.iter().map(|r| r.transform(transform, container)).collect() }
    }

    /// Collapses the region into its bounding box when it holds more than `max_rects` rectangles.
    pub fn simplify(&mut self, max_rects: usize) {
        if self.rects.len() > max_rects {
            let extents = self.extents();
            self.rects = vec![extents];
        }
    }
}

impl From<Rectangle> for Region {
    fn from(rect: Rectangle) -> Self {
        Region::from_rect(rect)
    }
}
