//! Viewport transform safety: normalization, fit scales and discrete zoom stops.

use crate::geometry::{zooms_almost_equal, Point, Rect, Size, Transform};
use crate::layout::PageLayout;

/// Everything a normalizer may look at. No hidden state.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub viewport: Size,
    pub layout: &'a PageLayout,
    pub min_scale: f64,
    pub max_scale: f64,
}

/// Pass applied to every proposed transform before it is committed.
pub trait TransformNormalizer: Send + Sync {
    fn normalize(&self, proposed: Transform, context: &NormalizeContext<'_>) -> Transform;
}

impl<F> TransformNormalizer for F
where
    F: Fn(Transform, &NormalizeContext<'_>) -> Transform + Send + Sync,
{
    fn normalize(&self, proposed: Transform, context: &NormalizeContext<'_>) -> Transform {
        self(proposed, context)
    }
}

/// Default normalizer: clamps zoom into range and keeps the viewport center inside the document.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClampToDocument;

impl TransformNormalizer for ClampToDocument {
    fn normalize(&self, proposed: Transform, context: &NormalizeContext<'_>) -> Transform {
        normalize_transform(proposed, context)
    }
}

pub fn clamp_zoom(zoom: f64, min_scale: f64, max_scale: f64) -> f64 {
    let zoom = if zoom.is_finite() && zoom > 0.0 {
        zoom
    } else {
        min_scale
    };
    zoom.max(min_scale).min(max_scale.max(min_scale))
}

pub fn normalize_transform(proposed: Transform, context: &NormalizeContext<'_>) -> Transform {
    let viewport = context.viewport;
    let zoom = clamp_zoom(proposed.scale, context.min_scale, context.max_scale);
    if viewport.is_empty() {
        return Transform::new(zoom, proposed.translate_x, proposed.translate_y);
    }
    let center = proposed.center_point(viewport);
    let document = context.layout.document_size;

    let clamp_axis = |value: f64, half_view: f64, extent: f64| {
        let low = half_view / zoom;
        let high = extent - half_view / zoom;
        if low > high {
            extent / 2.0
        } else {
            value.clamp(low, high)
        }
    };

    let x = clamp_axis(center.x, viewport.width / 2.0, document.width);
    let y = clamp_axis(center.y, viewport.height / 2.0, document.height);
    Transform::centered_on(Point::new(x, y), zoom, viewport)
}

/// Zoom at which the document fills the viewport on both axes.
pub fn cover_scale(viewport: Size, layout: &PageLayout) -> f64 {
    let document = layout.document_size;
    if document.is_empty() || viewport.is_empty() {
        return 1.0;
    }
    (viewport.width / document.width).max(viewport.height / document.height)
}

/// Zoom at which `page` plus its margin fits entirely inside the viewport.
pub fn alternative_fit_scale(viewport: Size, page: &Rect, margin: f64) -> Option<f64> {
    let framed = page.inflate(margin, margin);
    if framed.is_empty() {
        return None;
    }
    let scale = (viewport.width / framed.width()).min(viewport.height / framed.height());
    (scale > 0.0 && scale.is_finite()).then_some(scale)
}

/// Lower zoom bound: either the configured floor or, when pinned, the fit scale.
pub fn minimum_scale(
    configured_min: f64,
    pin_to_fit: bool,
    cover_scale: f64,
    alternative_fit: Option<f64>,
) -> f64 {
    if !pin_to_fit {
        return configured_min;
    }
    match alternative_fit {
        Some(fit) => cover_scale.min(fit),
        None => cover_scale,
    }
}

/// Ascending table of zoom stops; neighbours always differ by more than 1%.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZoomStops {
    stops: Vec<f64>,
}

impl ZoomStops {
    pub fn compute(
        cover_scale: f64,
        alternative_fit: Option<f64>,
        min_scale: f64,
        max_scale: f64,
        pin_min_to_fit: bool,
    ) -> Self {
        let cover = cover_scale.min(max_scale);
        let mut stops = Vec::new();

        let mut zoom = match alternative_fit.map(|fit| fit.min(max_scale)) {
            Some(fit) if !zooms_almost_equal(fit, cover) => {
                stops.push(fit.min(cover));
                fit.max(cover)
            }
            _ => cover,
        };

        while zoom < max_scale && !zooms_almost_equal(zoom, max_scale) {
            stops.push(zoom);
            zoom *= 2.0;
        }
        match stops.last() {
            Some(&last) if zooms_almost_equal(last, max_scale) => {}
            _ => stops.push(max_scale),
        }

        if !pin_min_to_fit {
            let mut zoom = stops[0];
            loop {
                let half = zoom / 2.0;
                if half < min_scale || zooms_almost_equal(half, min_scale) {
                    break;
                }
                stops.insert(0, half);
                zoom = half;
            }
            if stops[0] > min_scale && !zooms_almost_equal(stops[0], min_scale) {
                stops.insert(0, min_scale);
            }
        }

        Self { stops }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.stops
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// First stop above `current`; wraps to the first stop when `wrap` is set.
    pub fn next(&self, current: f64, wrap: bool) -> Option<f64> {
        let found = self
            .stops
            .iter()
            .copied()
            .find(|&stop| stop > current && !zooms_almost_equal(stop, current));
        match found {
            Some(stop) => Some(stop),
            None if wrap => self.stops.first().copied(),
            None => self.stops.last().copied(),
        }
    }

    /// First stop below `current`; wraps to the last stop when `wrap` is set.
    pub fn previous(&self, current: f64, wrap: bool) -> Option<f64> {
        let found = self
            .stops
            .iter()
            .rev()
            .copied()
            .find(|&stop| stop < current && !zooms_almost_equal(stop, current));
        match found {
            Some(stop) => Some(stop),
            None if wrap => self.stops.last().copied(),
            None => self.stops.first().copied(),
        }
    }
}
