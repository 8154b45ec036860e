use crate::geometry::{Point, Rect};
use crate::navigation::Destination;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkTarget {
    Uri(String),
    Destination(Destination),
}

/// Clickable area of a page. Rectangles are page-local.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub rects: Vec<Rect>,
    pub target: LinkTarget,
}

impl Link {
    pub fn new(rects: Vec<Rect>, target: LinkTarget) -> Self {
        Self { rects, target }
    }

    pub fn contains(&self, point: Point) -> bool {
        self.rects.iter().any(|rect| rect.contains(point))
    }
}

/// First link containing the page-local `point`.
pub fn hit_test(links: &[Link], point: Point) -> Option<&Link> {
    links.iter().find(|link| link.contains(point))
}
