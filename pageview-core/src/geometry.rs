use serde::{Deserialize, Serialize};

/// Relative tolerance used whenever two zoom factors are compared.
pub const ZOOM_TOLERANCE: f64 = 0.01;

/// Returns true when the two zoom factors differ by no more than 1% of the larger one.
pub fn zooms_almost_equal(a: f64, b: f64) -> bool {
    let largest = a.abs().max(b.abs());
    if largest == 0.0 {
        return true;
    }
    (a - b).abs() <= largest * ZOOM_TOLERANCE
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn distance_squared(self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Axis-aligned rectangle with a top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub const fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_xywh(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn from_size(size: Size) -> Self {
        Self::new(0.0, 0.0, size.width, size.height)
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }

    pub fn area(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn top_left(&self) -> Point {
        Point::new(self.left, self.top)
    }

    pub fn top_right(&self) -> Point {
        Point::new(self.right, self.top)
    }

    pub fn bottom_left(&self) -> Point {
        Point::new(self.left, self.bottom)
    }

    pub fn bottom_right(&self) -> Point {
        Point::new(self.right, self.bottom)
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    /// Half-open containment: the right and bottom edges are outside.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left && point.x < self.right && point.y >= self.top && point.y < self.bottom
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let rect = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if rect.is_empty() {
            None
        } else {
            Some(rect)
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    pub fn inflate(&self, horizontal: f64, vertical: f64) -> Rect {
        Rect::new(
            self.left - horizontal,
            self.top - vertical,
            self.right + horizontal,
            self.bottom + vertical,
        )
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    pub fn scale(&self, factor: f64) -> Rect {
        Rect::new(
            self.left * factor,
            self.top * factor,
            self.right * factor,
            self.bottom * factor,
        )
    }

    /// Squared distance from `point` to the closest point of the rectangle; zero inside.
    pub fn distance_squared_to(&self, point: Point) -> f64 {
        let dx = (self.left - point.x).max(0.0).max(point.x - self.right);
        let dy = (self.top - point.y).max(0.0).max(point.y - self.bottom);
        dx * dx + dy * dy
    }

    /// Converts a document-space rectangle into the local space of `page`.
    pub fn to_page_local(&self, page: &Rect) -> Rect {
        self.translate(-page.left, -page.top)
    }

    /// Converts a page-local rectangle back into document space.
    pub fn from_page_local(&self, page: &Rect) -> Rect {
        self.translate(page.left, page.top)
    }
}

/// Uniform-scale similarity transform mapping document space into viewport space:
/// `viewport = document * scale + translation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub scale: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        scale: 1.0,
        translate_x: 0.0,
        translate_y: 0.0,
    };

    pub const fn new(scale: f64, translate_x: f64, translate_y: f64) -> Self {
        Self {
            scale,
            translate_x,
            translate_y,
        }
    }

    /// Builds the transform that shows `center` (document space) in the middle of the viewport.
    pub fn centered_on(center: Point, scale: f64, viewport: Size) -> Self {
        Self::new(
            scale,
            viewport.width / 2.0 - center.x * scale,
            viewport.height / 2.0 - center.y * scale,
        )
    }

    /// Builds the transform that keeps the document point `anchor` under viewport point `at`.
    pub fn anchored(anchor: Point, at: Point, scale: f64) -> Self {
        Self::new(scale, at.x - anchor.x * scale, at.y - anchor.y * scale)
    }

    pub fn to_viewport(&self, point: Point) -> Point {
        Point::new(
            point.x * self.scale + self.translate_x,
            point.y * self.scale + self.translate_y,
        )
    }

    pub fn to_document(&self, point: Point) -> Point {
        Point::new(
            (point.x - self.translate_x) / self.scale,
            (point.y - self.translate_y) / self.scale,
        )
    }

    pub fn rect_to_viewport(&self, rect: &Rect) -> Rect {
        let top_left = self.to_viewport(rect.top_left());
        let bottom_right = self.to_viewport(rect.bottom_right());
        Rect::new(top_left.x, top_left.y, bottom_right.x, bottom_right.y)
    }

    pub fn rect_to_document(&self, rect: &Rect) -> Rect {
        let top_left = self.to_document(rect.top_left());
        let bottom_right = self.to_document(rect.bottom_right());
        Rect::new(top_left.x, top_left.y, bottom_right.x, bottom_right.y)
    }

    /// Document-space rectangle currently covered by a viewport of `viewport` size.
    pub fn visible_rect(&self, viewport: Size) -> Rect {
        self.rect_to_document(&Rect::from_size(viewport))
    }

    /// Document-space point shown at the center of the viewport.
    pub fn center_point(&self, viewport: Size) -> Point {
        self.to_document(Point::new(viewport.width / 2.0, viewport.height / 2.0))
    }

    /// Component-wise linear interpolation, `t` in `0..=1`.
    pub fn lerp(&self, target: &Transform, t: f64) -> Transform {
        let mix = |a: f64, b: f64| a + (b - a) * t;
        Transform::new(
            mix(self.scale, target.scale),
            mix(self.translate_x, target.translate_x),
            mix(self.translate_y, target.translate_y),
        )
    }

    pub fn approx_eq(&self, other: &Transform, epsilon: f64) -> bool {
        (self.scale - other.scale).abs() <= epsilon
            && (self.translate_x - other.translate_x).abs() <= epsilon
            && (self.translate_y - other.translate_y).abs() <= epsilon
    }
}

/// Cubic ease-in-out curve over `0..=1`.
pub fn ease_in_out(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        let f = -2.0 * t + 2.0;
        1.0 - f * f * f / 2.0
    }
}
