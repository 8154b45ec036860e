//! Go-to-page/area/destination targets and current-page tracking.

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect, Size, Transform};
use crate::layout::PageLayout;

/// Where a navigation target lands inside the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageAnchor {
    TopLeft,
    #[default]
    Top,
    TopRight,
    Left,
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
    /// Fit the whole target inside the viewport.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Start,
    Middle,
    End,
}

impl PageAnchor {
    fn horizontal(self) -> Align {
        match self {
            PageAnchor::TopLeft | PageAnchor::Left | PageAnchor::BottomLeft => Align::Start,
            PageAnchor::TopRight | PageAnchor::Right | PageAnchor::BottomRight => Align::End,
            _ => Align::Middle,
        }
    }

    fn vertical(self) -> Align {
        match self {
            PageAnchor::TopLeft | PageAnchor::Top | PageAnchor::TopRight => Align::Start,
            PageAnchor::BottomLeft | PageAnchor::Bottom | PageAnchor::BottomRight => Align::End,
            _ => Align::Middle,
        }
    }
}

/// Positioning command of a document-defined destination. Coordinates are page-local;
/// a missing coordinate means "page edge".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DestinationCommand {
    Xyz {
        left: Option<f64>,
        top: Option<f64>,
        zoom: Option<f64>,
    },
    Fit,
    FitH {
        top: Option<f64>,
    },
    FitV {
        left: Option<f64>,
    },
    FitR {
        rect: Rect,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Destination {
    pub page_number: u32,
    pub command: DestinationCommand,
}

impl Destination {
    /// Top-left of `page_number` at the current zoom.
    pub fn page(page_number: u32) -> Self {
        Self {
            page_number,
            command: DestinationCommand::Xyz {
                left: None,
                top: None,
                zoom: None,
            },
        }
    }
}

/// Clamps a requested page into `1..=page_count`. Requests at or past the last page
/// land on it with `end_anchor` instead.
pub fn clamp_page_target(
    page_number: u32,
    anchor: PageAnchor,
    end_anchor: PageAnchor,
    page_count: u32,
) -> Option<(u32, PageAnchor)> {
    if page_count == 0 {
        return None;
    }
    let page_number = page_number.max(1);
    if page_number >= page_count && page_count != 1 {
        let anchor = if anchor == PageAnchor::All {
            anchor
        } else {
            end_anchor
        };
        return Some((page_count, anchor));
    }
    Some((page_number, anchor))
}

/// Transform showing `area` (document space) aligned by `anchor`. Every anchor except
/// [`PageAnchor::All`] keeps `zoom`; `All` picks the zoom that fits `area`.
pub fn transform_for_area(area: &Rect, anchor: PageAnchor, zoom: f64, viewport: Size) -> Transform {
    if anchor == PageAnchor::All {
        let fit = (viewport.width / area.width()).min(viewport.height / area.height());
        let zoom = if fit.is_finite() && fit > 0.0 { fit } else { zoom };
        return Transform::centered_on(area.center(), zoom, viewport);
    }

    let visible_width = viewport.width / zoom;
    let visible_height = viewport.height / zoom;
    let width = area.width().min(visible_width);
    let height = area.height().min(visible_height);

    let x = match anchor.horizontal() {
        Align::Start => area.left + width / 2.0,
        Align::Middle => area.center().x,
        Align::End => area.right - width / 2.0,
    };
    let y = match anchor.vertical() {
        Align::Start => area.top + height / 2.0,
        Align::Middle => area.center().y,
        Align::End => area.bottom - height / 2.0,
    };
    Transform::centered_on(Point::new(x, y), zoom, viewport)
}

/// Transform for a destination on the page laid out at `page_rect`.
pub fn transform_for_destination(
    command: &DestinationCommand,
    page_rect: &Rect,
    zoom: f64,
    viewport: Size,
) -> Transform {
    let origin = Point::new(0.0, 0.0);
    match *command {
        DestinationCommand::Xyz { left, top, zoom: z } => {
            let zoom = z.filter(|z| z.is_finite() && *z > 0.0).unwrap_or(zoom);
            let anchor = Point::new(
                page_rect.left + left.unwrap_or(0.0),
                page_rect.top + top.unwrap_or(0.0),
            );
            Transform::anchored(anchor, origin, zoom)
        }
        DestinationCommand::Fit => transform_for_area(page_rect, PageAnchor::All, zoom, viewport),
        DestinationCommand::FitH { top } => {
            let zoom = viewport.width / page_rect.width();
            let anchor = Point::new(page_rect.left, page_rect.top + top.unwrap_or(0.0));
            Transform::anchored(anchor, origin, zoom)
        }
        DestinationCommand::FitV { left } => {
            let zoom = viewport.height / page_rect.height();
            let anchor = Point::new(page_rect.left + left.unwrap_or(0.0), page_rect.top);
            Transform::anchored(anchor, origin, zoom)
        }
        DestinationCommand::FitR { rect } => transform_for_area(
            &rect.from_page_local(page_rect),
            PageAnchor::All,
            zoom,
            viewport,
        ),
    }
}

/// Fraction of `page`'s area covered by `visible`.
fn overlap_ratio(visible: &Rect, page: &Rect) -> f64 {
    let area = page.area();
    if area <= 0.0 {
        return 0.0;
    }
    visible
        .intersection(page)
        .map(|overlap| overlap.area() / area)
        .unwrap_or(0.0)
}

/// Page with the largest fractional overlap with `visible`. `preferred` (the last
/// explicit navigation target) wins while its overlap stays above `hysteresis`.
pub fn current_page(
    visible: &Rect,
    layout: &PageLayout,
    preferred: Option<u32>,
    hysteresis: f64,
) -> Option<u32> {
    if let Some(page) = preferred {
        if let Some(rect) = layout.page_rect(page) {
            if overlap_ratio(visible, &rect) > hysteresis {
                return Some(page);
            }
        }
    }

    let mut best: Option<(u32, f64)> = None;
    for (index, rect) in layout.page_rects.iter().enumerate() {
        let ratio = overlap_ratio(visible, rect);
        if ratio > 0.0 && best.map_or(true, |(_, top)| ratio > top) {
            best = Some((index as u32 + 1, ratio));
        }
    }
    best.map(|(page, _)| page)
        .or_else(|| layout.nearest_page(visible.center()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PageInfo;
    use crate::layout::{PageLayoutStrategy, VerticalLayout};

    const VIEWPORT: Size = Size::new(800.0, 600.0);

    fn reference_layout() -> PageLayout {
        let pages: Vec<PageInfo> = (1..=3).map(|n| PageInfo::new(n, 600.0, 800.0)).collect();
        VerticalLayout.layout(&pages, 8.0)
    }

    #[test]
    fn top_anchor_aligns_viewport_with_page_top() {
        let layout = reference_layout();
        let zoom = 800.0 / 616.0;
        let page = layout.page_rect(2).unwrap();
        let transform = transform_for_area(&page, PageAnchor::Top, zoom, VIEWPORT);
        let visible = transform.visible_rect(VIEWPORT);
        assert!((visible.top - 816.0).abs() < 1e-9);
        assert!((visible.center().x - page.center().x).abs() < 1e-9);
    }

    #[test]
    fn bottom_right_anchor_aligns_far_corner() {
        let page = Rect::from_xywh(0.0, 0.0, 1000.0, 1000.0);
        let transform = transform_for_area(&page, PageAnchor::BottomRight, 2.0, VIEWPORT);
        let visible = transform.visible_rect(VIEWPORT);
        assert!((visible.right - 1000.0).abs() < 1e-9);
        assert!((visible.bottom - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn all_anchor_fits_the_area() {
        let area = Rect::from_xywh(0.0, 0.0, 400.0, 600.0);
        let transform = transform_for_area(&area, PageAnchor::All, 5.0, VIEWPORT);
        assert_eq!(transform.scale, 1.0);
        let visible = transform.visible_rect(VIEWPORT);
        assert!(visible.top <= 0.0 && visible.bottom >= 600.0);
    }

    #[test]
    fn page_requests_are_clamped() {
        assert_eq!(
            clamp_page_target(0, PageAnchor::Top, PageAnchor::Bottom, 3),
            Some((1, PageAnchor::Top))
        );
        assert_eq!(
            clamp_page_target(9, PageAnchor::Top, PageAnchor::Bottom, 3),
            Some((3, PageAnchor::Bottom))
        );
        assert_eq!(
            clamp_page_target(3, PageAnchor::All, PageAnchor::Bottom, 3),
            Some((3, PageAnchor::All))
        );
        assert_eq!(
            clamp_page_target(1, PageAnchor::Top, PageAnchor::Bottom, 1),
            Some((1, PageAnchor::Top))
        );
        assert_eq!(clamp_page_target(1, PageAnchor::Top, PageAnchor::Bottom, 0), None);
    }

    #[test]
    fn xyz_destination_places_point_at_viewport_origin() {
        let page = Rect::from_xywh(8.0, 816.0, 600.0, 800.0);
        let command = DestinationCommand::Xyz {
            left: Some(100.0),
            top: Some(50.0),
            zoom: Some(2.0),
        };
        let transform = transform_for_destination(&command, &page, 1.0, VIEWPORT);
        assert_eq!(transform.scale, 2.0);
        let visible = transform.visible_rect(VIEWPORT);
        assert!((visible.left - 108.0).abs() < 1e-9);
        assert!((visible.top - 866.0).abs() < 1e-9);
    }

    #[test]
    fn fit_width_destination_uses_page_width() {
        let page = Rect::from_xywh(8.0, 8.0, 400.0, 800.0);
        let command = DestinationCommand::FitH { top: Some(10.0) };
        let transform = transform_for_destination(&command, &page, 1.0, VIEWPORT);
        assert_eq!(transform.scale, 2.0);
    }

    #[test]
    fn current_page_follows_largest_overlap() {
        let layout = reference_layout();
        let visible = Rect::new(0.0, 700.0, 616.0, 1200.0);
        assert_eq!(current_page(&visible, &layout, None, 0.2), Some(2));
        let visible = Rect::new(0.0, 0.0, 616.0, 500.0);
        assert_eq!(current_page(&visible, &layout, None, 0.2), Some(1));
    }

    #[test]
    fn current_page_prefers_recent_target_above_hysteresis() {
        let layout = reference_layout();
        // Page 2 shows 184 units, 23% of its area.
        let visible = Rect::new(0.0, 16.0, 616.0, 1000.0);
        assert_eq!(current_page(&visible, &layout, None, 0.2), Some(1));
        assert_eq!(current_page(&visible, &layout, Some(2), 0.2), Some(2));
        let visible = Rect::new(0.0, 16.0, 616.0, 900.0);
        assert_eq!(current_page(&visible, &layout, Some(2), 0.2), Some(1));
    }
}
