//! Per-page character geometry and hit testing.
//!
//! All rectangles are page-local: document units with the page's top-left corner
//! at the origin.

use std::ops::Range;

use crate::geometry::{Point, Rect};

/// Default tolerance, in document units, for resolving a point to the nearest glyph.
pub const DEFAULT_HIT_MARGIN: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextDirection {
    #[default]
    Unknown,
    Ltr,
    Rtl,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextChar {
    pub ch: char,
    pub rect: Rect,
}

impl TextChar {
    pub fn new(ch: char, rect: Rect) -> Self {
        Self { ch, rect }
    }
}

/// A run of characters `[start, end)` sharing one writing direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextFragment {
    pub start: usize,
    pub end: usize,
    pub bounds: Rect,
    pub direction: TextDirection,
}

impl TextFragment {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageText {
    pub page_number: u32,
    chars: Vec<TextChar>,
    fragments: Vec<TextFragment>,
}

impl PageText {
    /// Fragments must be sorted by `start`, non-overlapping and within `chars`.
    pub fn new(page_number: u32, chars: Vec<TextChar>, fragments: Vec<TextFragment>) -> Self {
        Self {
            page_number,
            chars,
            fragments,
        }
    }

    /// Builds word fragments from raw characters: whitespace separates words and so
    /// does a jump to a new line.
    pub fn from_chars(page_number: u32, chars: Vec<TextChar>) -> Self {
        let mut fragments = Vec::new();
        let mut start: Option<usize> = None;

        for (index, current) in chars.iter().enumerate() {
            if current.ch.is_whitespace() || current.ch.is_control() {
                if let Some(begin) = start.take() {
                    fragments.push(make_fragment(&chars, begin, index));
                }
                continue;
            }
            match start {
                None => start = Some(index),
                Some(begin) => {
                    let previous = &chars[index - 1];
                    if starts_new_line(previous, current) {
                        fragments.push(make_fragment(&chars, begin, index));
                        start = Some(index);
                    }
                }
            }
        }
        if let Some(begin) = start {
            fragments.push(make_fragment(&chars, begin, chars.len()));
        }

        Self::new(page_number, chars, fragments)
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn chars(&self) -> &[TextChar] {
        &self.chars
    }

    pub fn fragments(&self) -> &[TextFragment] {
        &self.fragments
    }

    pub fn char_rect(&self, index: usize) -> Option<Rect> {
        self.chars.get(index).map(|c| c.rect)
    }

    pub fn text(&self, range: Range<usize>) -> String {
        let end = range.end.min(self.chars.len());
        let start = range.start.min(end);
        self.chars[start..end].iter().map(|c| c.ch).collect()
    }

    pub fn full_text(&self) -> String {
        self.text(0..self.chars.len())
    }

    pub fn fragment_for_char(&self, index: usize) -> Option<&TextFragment> {
        let position = self.fragments.partition_point(|f| f.end <= index);
        self.fragments
            .get(position)
            .filter(|fragment| fragment.range().contains(&index))
    }

    pub fn direction_at(&self, index: usize) -> TextDirection {
        self.fragment_for_char(index)
            .map(|fragment| fragment.direction)
            .unwrap_or_default()
    }

    /// Character under `point`: direct containment first, otherwise the nearest
    /// character whose box lies within `margin`.
    pub fn hit_test_char(&self, point: Point, margin: f64) -> Option<usize> {
        if let Some(index) = self.chars.iter().position(|c| c.rect.contains(point)) {
            return Some(index);
        }
        let limit = margin * margin;
        self.chars
            .iter()
            .enumerate()
            .map(|(index, c)| (index, c.rect.distance_squared_to(point)))
            .filter(|(_, distance)| *distance <= limit)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(index, _)| index)
    }

    pub fn hit_test_fragment(&self, point: Point) -> Option<&TextFragment> {
        self.fragments.iter().find(|f| f.bounds.contains(point))
    }

    /// Highlight rectangles for `[start, end)`, one per fragment slice.
    pub fn range_rects(&self, range: Range<usize>) -> Vec<Rect> {
        let end = range.end.min(self.chars.len());
        let start = range.start.min(end);
        let mut rects = Vec::new();
        for fragment in &self.fragments {
            let from = fragment.start.max(start);
            let to = fragment.end.min(end);
            if from >= to {
                continue;
            }
            let bounds = self.chars[from..to]
                .iter()
                .map(|c| c.rect)
                .reduce(|acc, rect| acc.union(&rect));
            if let Some(bounds) = bounds {
                rects.push(bounds);
            }
        }
        rects
    }
}

fn starts_new_line(previous: &TextChar, current: &TextChar) -> bool {
    let prev = previous.rect;
    let cur = current.rect;
    let vertical_overlap = prev.bottom.min(cur.bottom) - prev.top.max(cur.top);
    if vertical_overlap > 0.0 {
        return false;
    }
    // Glyphs stacked in the same column continue a vertical run.
    let horizontal_overlap = prev.right.min(cur.right) - prev.left.max(cur.left);
    !(horizontal_overlap > 0.0 && cur.top >= prev.top)
}

fn make_fragment(chars: &[TextChar], start: usize, end: usize) -> TextFragment {
    let slice = &chars[start..end];
    let bounds = slice
        .iter()
        .map(|c| c.rect)
        .reduce(|acc, rect| acc.union(&rect))
        .unwrap_or_default();
    TextFragment {
        start,
        end,
        bounds,
        direction: classify_direction(slice),
    }
}

fn classify_direction(chars: &[TextChar]) -> TextDirection {
    if chars.iter().any(|c| is_rtl_char(c.ch)) {
        return TextDirection::Rtl;
    }
    if chars.len() >= 2 {
        let first = chars[0].rect;
        let second = chars[1].rect;
        if second.top >= first.bottom - first.height() * 0.5 && second.left < first.right {
            return TextDirection::Vertical;
        }
    }
    if chars.iter().any(|c| c.ch.is_alphabetic()) {
        TextDirection::Ltr
    } else {
        TextDirection::Unknown
    }
}

fn is_rtl_char(ch: char) -> bool {
    matches!(
        ch as u32,
        0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF
    )
}
