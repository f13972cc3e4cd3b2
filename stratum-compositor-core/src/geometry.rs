//! Integer geometry shared by surfaces, outputs and the cursor.
//!
//! Rectangles use a top-left origin with `x` growing right and `y` growing down.
//! A rectangle with a non-positive width or height is empty.

use std::fmt;
use std::ops::{Add, Neg, Sub};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Point {
    type Output = Point;
    fn neg(self) -> Point {
        Point::new(-self.x, -self.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Divides both dimensions by `scale`, or `None` if they are not multiples of it.
    pub fn checked_div_exact(&self, scale: i32) -> Option<Size> {
        if scale <= 0 || self.width % scale != 0 || self.height % scale != 0 {
            return None;
        }
        Some(Size::new(self.width / scale, self.height / scale))
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_loc_and_size(loc: Point, size: Size) -> Self {
        Self::new(loc.x, loc.y, size.width, size.height)
    }

    pub fn loc(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    pub fn contains_rect(&self, other: &Self) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    pub fn intersects(&self, other: &Self) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.x < other.right()
            && self.right() > other.x
            && self.y < other.bottom()
            && self.bottom() > other.y
    }

    /// Bounding box of both rectangles. Empty rectangles are ignored.
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Overlapping area, or an empty rectangle at the origin.
    pub fn intersection(&self, other: &Self) -> Self {
        if !self.intersects(other) {
            return Self::default();
        }
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Splits `self` into at most four disjoint pieces not covered by `other`.
    pub fn subtract(&self, other: &Self) -> Vec<Self> {
        if !self.intersects(other) {
            return if self.is_empty() { Vec::new() } else { vec![*self] };
        }
        let cut = self.intersection(other);
        let mut pieces = Vec::with_capacity(4);
        if cut.y > self.y {
            pieces.push(Self::new(self.x, self.y, self.width, cut.y - self.y));
        }
        if cut.bottom() < self.bottom() {
            pieces.push(Self::new(self.x, cut.bottom(), self.width, self.bottom() - cut.bottom()));
        }
        if cut.x > self.x {
            pieces.push(Self::new(self.x, cut.y, cut.x - self.x, cut.height));
        }
        if cut.right() < self.right() {
            pieces.push(Self::new(cut.right(), cut.y, self.right() - cut.right(), cut.height));
        }
        pieces
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn translate_by(&self, offset: Point) -> Self {
        self.translate(offset.x, offset.y)
    }

    /// Multiplies position and size by an integer factor.
    pub fn scale_up(&self, factor: i32) -> Self {
        Self::new(self.x * factor, self.y * factor, self.width * factor, self.height * factor)
    }

    /// Divides by an integer factor, rounding outward so the result covers the input.
    pub fn scale_down(&self, factor: i32) -> Self {
        if factor <= 1 {
            return *self;
        }
        let x1 = self.x.div_euclid(factor);
        let y1 = self.y.div_euclid(factor);
        let x2 = div_ceil(self.right(), factor);
        let y2 = div_ceil(self.bottom(), factor);
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Scales by a fractional factor. Start edges are floored and end edges
    /// ceiled so that no partially covered pixel is lost.
    pub fn scale_outward(&self, factor: f64) -> Self {
        let x1 = (self.x as f64 * factor).floor() as i32;
        let y1 = (self.y as f64 * factor).floor() as i32;
        let x2 = (self.right() as f64 * factor).ceil() as i32;
        let y2 = (self.bottom() as f64 * factor).ceil() as i32;
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Grows the rectangle by `amount` on every side.
    pub fn pad(&self, amount: i32) -> Self {
        Self::new(
            self.x - amount,
            self.y - amount,
            self.width + 2 * amount,
            self.height + 2 * amount,
        )
    }

    /// Maps the rectangle through `transform` inside a container of `container` size.
    ///
    /// The result lives in the transformed container, whose size is
    /// [`Transform::transform_size`] of `container`.
    pub fn transform(&self, transform: Transform, container: Size) -> Self {
        let (w, h) = (container.width, container.height);
        let Rectangle { x, y, width, height } = *self;
        match transform {
            Transform::Normal => *self,
            Transform::Rotated90 => Self::new(h - y - height, x, height, width),
            Transform::Rotated180 => Self::new(w - x - width, h - y - height, width, height),
            Transform::Rotated270 => Self::new(y, w - x - width, height, width),
            Transform::Flipped => Self::new(w - x - width, y, width, height),
            Transform::Flipped90 => Self::new(h - y - height, w - x - width, height, width),
            Transform::Flipped180 => Self::new(x, h - y - height, width, height),
            Transform::Flipped270 => Self::new(y, x, height, width),
        }
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

fn div_ceil(value: i32, divisor: i32) -> i32 {
    let quotient = value.div_euclid(divisor);
    if value.rem_euclid(divisor) == 0 {
        quotient
    } else {
        quotient + 1
    }
}

/// Rotation (counter-clockwise) and optional horizontal flip applied to a
/// buffer or an output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Transform {
    #[default]
    Normal,
    Rotated90,
    Rotated180,
    Rotated270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl Transform {
    pub const ALL: [Transform; 8] = [
        Transform::Normal,
        Transform::Rotated90,
        Transform::Rotated180,
        Transform::Rotated270,
        Transform::Flipped,
        Transform::Flipped90,
        Transform::Flipped180,
        Transform::Flipped270,
    ];

    /// The transform that undoes `self`.
    pub fn invert(self) -> Self {
        match self {
            Transform::Rotated90 => Transform::Rotated270,
            Transform::Rotated270 => Transform::Rotated90,
            other => other,
        }
    }

    /// Whether width and height trade places.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Transform::Rotated90 | Transform::Rotated270 | Transform::Flipped90 | Transform::Flipped270
        )
    }

    pub fn transform_size(self, size: Size) -> Size {
        if self.swaps_axes() {
            Size::new(size.height, size.width)
        } else {
            size
        }
    }
}
