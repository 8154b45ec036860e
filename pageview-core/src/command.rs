use crate::geometry::Point;

/// Discrete viewer operations, as produced by key bindings.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Pan by a viewport-pixel delta.
    ScrollBy { dx: f64, dy: f64 },
    /// Multiply the zoom around a viewport point.
    ZoomAt { focus: Point, factor: f64 },
    ZoomIn { wrap: bool },
    ZoomOut { wrap: bool },
    /// Fit the current page into the viewport.
    FitPage,
    NextPage { count: u32 },
    PrevPage { count: u32 },
    GotoPage { page: u32 },
    FirstPage,
    LastPage,
    SelectAll,
    ClearSelection,
}
