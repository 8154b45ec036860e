use crate::document::PageInfo;
use crate::geometry::{Point, Rect, Size};

/// Placement of every page in document space.
///
/// Compared by value: a recomputed layout that is structurally identical to the
/// previous one is treated as unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub page_rects: Vec<Rect>,
    pub document_size: Size,
}

impl PageLayout {
    pub fn page_count(&self) -> u32 {
        self.page_rects.len() as u32
    }

    /// Rectangle of a 1-based page number.
    pub fn page_rect(&self, page_number: u32) -> Option<Rect> {
        let index = page_number.checked_sub(1)? as usize;
        self.page_rects.get(index).copied()
    }

    pub fn document_rect(&self) -> Rect {
        Rect::from_size(self.document_size)
    }

    /// Page whose rectangle contains `point`.
    pub fn page_at(&self, point: Point) -> Option<u32> {
        self.page_rects
            .iter()
            .position(|rect| rect.contains(point))
            .map(|index| index as u32 + 1)
    }

    /// Page whose rectangle is closest to `point`; used when a drag leaves the page area.
    pub fn nearest_page(&self, point: Point) -> Option<u32> {
        self.page_rects
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.distance_squared_to(point)
                    .total_cmp(&b.distance_squared_to(point))
            })
            .map(|(index, _)| index as u32 + 1)
    }

    /// Pages whose rectangles intersect `area`, in page order.
    pub fn pages_intersecting(&self, area: &Rect) -> Vec<u32> {
        self.page_rects
            .iter()
            .enumerate()
            .filter(|(_, rect)| rect.intersects(area))
            .map(|(index, _)| index as u32 + 1)
            .collect()
    }
}

/// Strategy computing page placement from page sizes and the configured margin.
pub trait PageLayoutStrategy: Send + Sync {
    fn layout(&self, pages: &[PageInfo], margin: f64) -> PageLayout;
}

impl<F> PageLayoutStrategy for F
where
    F: Fn(&[PageInfo], f64) -> PageLayout + Send + Sync,
{
    fn layout(&self, pages: &[PageInfo], margin: f64) -> PageLayout {
        self(pages, margin)
    }
}

/// Pages stacked top to bottom, each centered against the widest page.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerticalLayout;

impl PageLayoutStrategy for VerticalLayout {
    fn layout(&self, pages: &[PageInfo], margin: f64) -> PageLayout {
        let max_width = pages.iter().map(|p| p.width).fold(0.0, f64::max);
        let mut y = margin;
        let mut page_rects = Vec::with_capacity(pages.len());
        for page in pages {
            let x = margin + (max_width - page.width) / 2.0;
            page_rects.push(Rect::from_xywh(x, y, page.width, page.height));
            y += page.height + margin;
        }
        PageLayout {
            page_rects,
            document_size: Size::new(max_width + margin * 2.0, y),
        }
    }
}

/// Pages placed left to right, each centered against the tallest page.
#[derive(Debug, Clone, Copy, Default)]
pub struct HorizontalLayout;

impl PageLayoutStrategy for HorizontalLayout {
    fn layout(&self, pages: &[PageInfo], margin: f64) -> PageLayout {
        let max_height = pages.iter().map(|p| p.height).fold(0.0, f64::max);
        let mut x = margin;
        let mut page_rects = Vec::with_capacity(pages.len());
        for page in pages {
            let y = margin + (max_height - page.height) / 2.0;
            page_rects.push(Rect::from_xywh(x, y, page.width, page.height));
            x += page.width + margin;
        }
        PageLayout {
            page_rects,
            document_size: Size::new(x, max_height + margin * 2.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(sizes: &[(f64, f64)]) -> Vec<PageInfo> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &(w, h))| PageInfo::new(i as u32 + 1, w, h))
            .collect()
    }

    #[test]
    fn vertical_layout_matches_reference_document() {
        let layout = VerticalLayout.layout(&pages(&[(600.0, 800.0); 3]), 8.0);
        assert_eq!(layout.document_size, Size::new(616.0, 2432.0));
        assert_eq!(layout.page_rect(2), Some(Rect::from_xywh(8.0, 816.0, 600.0, 800.0)));
        assert_eq!(layout.page_rect(0), None);
        assert_eq!(layout.page_rect(4), None);
    }

    #[test]
    fn vertical_layout_centers_narrow_pages() {
        let layout = VerticalLayout.layout(&pages(&[(600.0, 800.0), (400.0, 300.0)]), 10.0);
        let narrow = layout.page_rect(2).unwrap();
        assert_eq!(narrow.left, 110.0);
        assert_eq!(narrow.right, 510.0);
        assert_eq!(layout.document_size, Size::new(620.0, 1130.0));
    }

    #[test]
    fn horizontal_layout_runs_left_to_right() {
        let layout = HorizontalLayout.layout(&pages(&[(100.0, 200.0), (100.0, 100.0)]), 5.0);
        assert_eq!(layout.page_rect(2), Some(Rect::from_xywh(110.0, 55.0, 100.0, 100.0)));
        assert_eq!(layout.document_size, Size::new(215.0, 210.0));
    }

    #[test]
    fn closures_act_as_layout_strategies() {
        let strategy = |pages: &[PageInfo], _margin: f64| PageLayout {
            page_rects: pages
                .iter()
                .map(|p| Rect::from_xywh(0.0, 0.0, p.width, p.height))
                .collect(),
            document_size: Size::new(1.0, 1.0),
        };
        let layout = strategy.layout(&pages(&[(10.0, 10.0)]), 4.0);
        assert_eq!(layout.document_size, Size::new(1.0, 1.0));
    }

    #[test]
    fn recomputed_layouts_compare_structurally() {
        let input = pages(&[(600.0, 800.0); 2]);
        assert_eq!(VerticalLayout.layout(&input, 8.0), VerticalLayout.layout(&input, 8.0));
        assert_ne!(VerticalLayout.layout(&input, 8.0), VerticalLayout.layout(&input, 4.0));
    }

    #[test]
    fn page_lookup_by_point() {
        let layout = VerticalLayout.layout(&pages(&[(600.0, 800.0); 3]), 8.0);
        assert_eq!(layout.page_at(Point::new(100.0, 900.0)), Some(2));
        assert_eq!(layout.page_at(Point::new(100.0, 812.0)), None);
        assert_eq!(layout.nearest_page(Point::new(100.0, 813.0)), Some(2));
        assert_eq!(
            layout.pages_intersecting(&Rect::from_xywh(0.0, 700.0, 616.0, 900.0)),
            vec![1, 2]
        );
    }
}
