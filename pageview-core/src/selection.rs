//! Two-anchor text selection spanning any number of pages.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use anyhow::Result;

use crate::geometry::{Point, Rect};
use crate::text::{PageText, TextDirection};

/// A character position: 1-based page plus index into that page's [`PageText`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TextPosition {
    pub page_number: u32,
    pub index: usize,
}

impl TextPosition {
    pub const fn new(page_number: u32, index: usize) -> Self {
        Self { page_number, index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorRole {
    Start,
    End,
}

/// Resolved boundary of the selection, used to draw drag handles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionAnchor {
    pub position: TextPosition,
    /// Page-local box of the boundary character.
    pub rect: Rect,
    pub direction: TextDirection,
    pub role: AnchorRole,
}

impl SelectionAnchor {
    /// Corner of the boundary glyph where the handle attaches. Right-to-left and
    /// vertical runs share the same corners.
    pub fn active_corner(&self) -> Point {
        let leading_left = matches!(self.direction, TextDirection::Ltr | TextDirection::Unknown);
        match (self.role, leading_left) {
            (AnchorRole::Start, true) => self.rect.top_left(),
            (AnchorRole::Start, false) => self.rect.top_right(),
            (AnchorRole::End, true) => self.rect.bottom_right(),
            (AnchorRole::End, false) => self.rect.bottom_left(),
        }
    }
}

/// Selected characters `[start, end)` of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRange {
    pub start: usize,
    pub end: usize,
}

impl SelectionRange {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Anchors `a` and `b` in the order they were set; ranges are rebuilt from scratch
/// whenever either one moves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextSelection {
    a: Option<TextPosition>,
    b: Option<TextPosition>,
    ranges: BTreeMap<u32, SelectionRange>,
    start: Option<SelectionAnchor>,
    end: Option<SelectionAnchor>,
}

impl TextSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn a(&self) -> Option<TextPosition> {
        self.a
    }

    pub fn b(&self) -> Option<TextPosition> {
        self.b
    }

    pub fn set_anchors(&mut self, a: TextPosition, b: TextPosition) {
        self.a = Some(a);
        self.b = Some(b);
    }

    pub fn set_a(&mut self, a: TextPosition) {
        self.a = Some(a);
    }

    pub fn set_b(&mut self, b: TextPosition) {
        self.b = Some(b);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.values().all(SelectionRange::is_empty)
    }

    pub fn ranges(&self) -> &BTreeMap<u32, SelectionRange> {
        &self.ranges
    }

    pub fn range_for_page(&self, page_number: u32) -> Option<SelectionRange> {
        self.ranges.get(&page_number).copied()
    }

    pub fn start_anchor(&self) -> Option<&SelectionAnchor> {
        self.start.as_ref()
    }

    pub fn end_anchor(&self) -> Option<&SelectionAnchor> {
        self.end.as_ref()
    }

    /// Rebuilds per-page ranges from the anchors. `text_for` returns already loaded
    /// page text; pages it cannot provide are returned so the caller can load them
    /// and recompute.
    pub fn recompute<F>(&mut self, text_for: F) -> Vec<u32>
    where
        F: Fn(u32) -> Option<Arc<PageText>>,
    {
        self.ranges.clear();
        self.start = None;
        self.end = None;

        let (Some(a), Some(b)) = (self.a, self.b) else {
            return Vec::new();
        };
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let mut missing = Vec::new();

        for page_number in first.page_number..=second.page_number {
            let Some(text) = text_for(page_number) else {
                missing.push(page_number);
                continue;
            };
            let len = text.len();
            let start = if page_number == first.page_number {
                first.index.min(len)
            } else {
                0
            };
            let end = if page_number == second.page_number {
                (second.index + 1).min(len)
            } else {
                len
            };
            if start < end {
                self.ranges.insert(page_number, SelectionRange { start, end });
            }

            if page_number == first.page_number {
                self.start = resolve_anchor(&text, first, AnchorRole::Start);
            }
            if page_number == second.page_number {
                self.end = resolve_anchor(&text, second, AnchorRole::End);
            }
        }
        missing
    }

    /// Selected text of every page in page order.
    pub fn selected_text<F>(&self, text_for: F) -> String
    where
        F: Fn(u32) -> Option<Arc<PageText>>,
    {
        let mut selected = String::new();
        for (page_number, range) in &self.ranges {
            if let Some(text) = text_for(*page_number) {
                selected.push_str(&text.text(range.range()));
            }
        }
        selected
    }

    /// Page-local highlight rectangles keyed by page.
    pub fn highlight_rects<F>(&self, text_for: F) -> Vec<(u32, Rect)>
    where
        F: Fn(u32) -> Option<Arc<PageText>>,
    {
        let mut rects = Vec::new();
        for (page_number, range) in &self.ranges {
            if let Some(text) = text_for(*page_number) {
                rects.extend(
                    text.range_rects(range.range())
                        .into_iter()
                        .map(|rect| (*page_number, rect)),
                );
            }
        }
        rects
    }
}

fn resolve_anchor(
    text: &PageText,
    position: TextPosition,
    role: AnchorRole,
) -> Option<SelectionAnchor> {
    let rect = text.char_rect(position.index)?;
    Some(SelectionAnchor {
        position,
        rect,
        direction: text.direction_at(position.index),
        role,
    })
}

/// Destination for copied text.
pub trait ClipboardSink {
    fn set_text(&mut self, text: String) -> Result<()>;
}

impl ClipboardSink for String {
    fn set_text(&mut self, text: String) -> Result<()> {
        *self = text;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::tests::line_chars;

    use std::collections::HashMap;

    fn pages(lines: &[&str]) -> HashMap<u32, Arc<PageText>> {
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let number = i as u32 + 1;
                (
                    number,
                    Arc::new(PageText::from_chars(number, line_chars(line, 0.0, 0.0))),
                )
            })
            .collect()
    }

    #[test]
    fn same_page_range_ignores_drag_direction() {
        let texts = pages(&["hello world"]);
        let lookup = |page: u32| texts.get(&page).cloned();

        let mut forward = TextSelection::new();
        forward.set_anchors(TextPosition::new(1, 2), TextPosition::new(1, 7));
        forward.recompute(lookup);

        let mut backward = TextSelection::new();
        backward.set_anchors(TextPosition::new(1, 7), TextPosition::new(1, 2));
        backward.recompute(lookup);

        assert_eq!(forward.ranges(), backward.ranges());
        assert_eq!(forward.selected_text(lookup), "llo wo");
        assert_eq!(backward.start_anchor().unwrap().position.index, 2);
    }

    #[test]
    fn cross_page_selection_fills_middle_pages() {
        let texts = pages(&["first", "second", "third", "fourth", "fifth"]);
        let lookup = |page: u32| texts.get(&page).cloned();

        let mut selection = TextSelection::new();
        selection.set_anchors(TextPosition::new(5, 1), TextPosition::new(2, 3));
        let missing = selection.recompute(lookup);
        assert!(missing.is_empty());

        let ranges = selection.ranges();
        assert_eq!(ranges.keys().copied().collect::<Vec<_>>(), vec![2, 3, 4, 5]);
        assert_eq!(ranges[&2], SelectionRange { start: 3, end: 6 });
        assert_eq!(ranges[&3], SelectionRange { start: 0, end: 5 });
        assert_eq!(ranges[&4], SelectionRange { start: 0, end: 6 });
        assert_eq!(ranges[&5], SelectionRange { start: 0, end: 2 });
        assert_eq!(selection.selected_text(lookup), "ondthirdfourthfi");
    }

    #[test]
    fn unloaded_pages_are_reported_missing() {
        let mut texts = pages(&["one", "two", "three"]);
        texts.remove(&2);
        let lookup = |page: u32| texts.get(&page).cloned();

        let mut selection = TextSelection::new();
        selection.set_anchors(TextPosition::new(1, 0), TextPosition::new(3, 1));
        assert_eq!(selection.recompute(lookup), vec![2]);
        assert!(selection.range_for_page(2).is_none());
        assert_eq!(selection.range_for_page(3), Some(SelectionRange { start: 0, end: 2 }));
    }

    #[test]
    fn anchor_corners_follow_direction() {
        let rect = Rect::from_xywh(10.0, 20.0, 10.0, 12.0);
        let anchor = |direction, role| SelectionAnchor {
            position: TextPosition::new(1, 0),
            rect,
            direction,
            role,
        };
        assert_eq!(
            anchor(TextDirection::Ltr, AnchorRole::Start).active_corner(),
            Point::new(10.0, 20.0)
        );
        assert_eq!(
            anchor(TextDirection::Ltr, AnchorRole::End).active_corner(),
            Point::new(20.0, 32.0)
        );
        assert_eq!(
            anchor(TextDirection::Rtl, AnchorRole::Start).active_corner(),
            Point::new(20.0, 20.0)
        );
        assert_eq!(
            anchor(TextDirection::Vertical, AnchorRole::End).active_corner(),
            Point::new(10.0, 32.0)
        );
    }

    #[test]
    fn clear_drops_anchors_and_ranges() {
        let texts = pages(&["abc"]);
        let mut selection = TextSelection::new();
        selection.set_anchors(TextPosition::new(1, 0), TextPosition::new(1, 2));
        selection.recompute(|page| texts.get(&page).cloned());
        assert!(!selection.is_empty());
        selection.clear();
        assert!(selection.is_empty());
        assert!(selection.a().is_none());
        assert!(selection.start_anchor().is_none());
    }
}
