//! Software compositor: paints the cached page bitmaps of a frame into one RGBA
//! canvas the size of the viewport.

use pageview_core::image_cache::{PartialImage, PreviewImage};
use pageview_core::{FrameSnapshot, Point, Rect, RenderImage, Transform, Viewer, VisiblePage};
use rayon::prelude::*;

/// Paper color for pages whose preview has not arrived yet.
pub const PAPER: [u8; 4] = [255, 255, 255, 255];
pub const HIGHLIGHT: [u8; 4] = [66, 133, 244, 96];

pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32, background: [u8; 4]) -> Self {
        let image = RenderImage::filled(width, height, background);
        Self {
            width,
            height,
            pixels: image.pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let mut out = [0; 4];
        out.copy_from_slice(&self.pixels[offset..offset + 4]);
        out
    }

    pub fn into_image(self) -> RenderImage {
        RenderImage {
            width: self.width,
            height: self.height,
            pixels: self.pixels,
        }
    }

    /// Integer pixel bounds of a viewport rectangle, clipped to the canvas.
    fn clip(&self, rect: &Rect) -> Option<(usize, usize, usize, usize)> {
        let left = rect.left.floor().max(0.0) as usize;
        let top = rect.top.floor().max(0.0) as usize;
        let right = (rect.right.ceil().max(0.0) as usize).min(self.width as usize);
        let bottom = (rect.bottom.ceil().max(0.0) as usize).min(self.height as usize);
        (left < right && top < bottom).then_some((left, top, right, bottom))
    }

    /// Runs `paint(x, y, pixel)` in parallel over every pixel whose center lies in `rect`.
    fn paint_rect<F>(&mut self, rect: &Rect, paint: F)
    where
        F: Fn(usize, usize, &mut [u8]) + Sync,
    {
        let Some((left, top, right, bottom)) = self.clip(rect) else {
            return;
        };
        let stride = self.width as usize * 4;
        self.pixels
            .par_chunks_exact_mut(stride)
            .enumerate()
            .skip(top)
            .take(bottom - top)
            .for_each(|(y, row)| {
                let center_y = y as f64 + 0.5;
                if center_y < rect.top || center_y >= rect.bottom {
                    return;
                }
                for x in left..right {
                    let center_x = x as f64 + 0.5;
                    if center_x < rect.left || center_x >= rect.right {
                        continue;
                    }
                    paint(x, y, &mut row[x * 4..x * 4 + 4]);
                }
            });
    }
}

fn sample(image: &RenderImage, x: f64, y: f64) -> Option<[u8; 4]> {
    if image.width == 0 || image.height == 0 || x < 0.0 || y < 0.0 {
        return None;
    }
    let (x, y) = (x as u32, y as u32);
    if x >= image.width || y >= image.height {
        return None;
    }
    let offset = (y as usize * image.width as usize + x as usize) * 4;
    let mut out = [0; 4];
    out.copy_from_slice(&image.pixels[offset..offset + 4]);
    Some(out)
}

fn blend(dst: &mut [u8], color: [u8; 4]) {
    let alpha = color[3] as u32;
    for channel in 0..3 {
        let mixed = (color[channel] as u32 * alpha + dst[channel] as u32 * (255 - alpha)) / 255;
        dst[channel] = mixed as u8;
    }
}

/// Paints one page. Inside the partial's region the high-resolution bitmap wins;
/// elsewhere the preview is stretched, nearest-neighbour.
pub fn paint_page(
    canvas: &mut Canvas,
    transform: &Transform,
    page: &VisiblePage,
    preview: Option<&PreviewImage>,
    partial: Option<&PartialImage>,
) {
    let target = transform.rect_to_viewport(&page.rect);
    let ratio = if page.info.width > 0.0 {
        page.rect.width() / page.info.width
    } else {
        1.0
    };
    let partial_rect = partial.map(|partial| partial.page_rect());

    canvas.paint_rect(&target, |x, y, pixel| {
        let document = transform.to_document(Point::new(x as f64 + 0.5, y as f64 + 0.5));
        let local = Point::new(
            (document.x - page.rect.left) / ratio,
            (document.y - page.rect.top) / ratio,
        );

        let from_partial = match (partial, partial_rect) {
            (Some(partial), Some(rect)) if rect.contains(local) => sample(
                &partial.image,
                local.x * partial.scale - partial.region.x as f64,
                local.y * partial.scale - partial.region.y as f64,
            ),
            _ => None,
        };
        let color = from_partial
            .or_else(|| {
                preview.and_then(|preview| {
                    sample(&preview.image, local.x * preview.scale, local.y * preview.scale)
                })
            })
            .unwrap_or(PAPER);
        pixel.copy_from_slice(&color);
    });
}

/// Blends translucent selection highlights given in document space.
pub fn paint_highlights(canvas: &mut Canvas, transform: &Transform, highlights: &[Rect]) {
    for rect in highlights {
        let target = transform.rect_to_viewport(rect);
        canvas.paint_rect(&target, |_, _, pixel| blend(pixel, HIGHLIGHT));
    }
}

/// Composes the viewer's current frame. `pixel_ratio` converts viewport units to
/// canvas pixels.
pub fn compose_frame(viewer: &Viewer, pixel_ratio: f64) -> RenderImage {
    let frame = viewer.frame();
    compose_with(&frame, pixel_ratio, |page, paint| {
        viewer.with_page_images(page, paint)
    })
}

/// Same as [`compose_frame`] with the bitmap lookup supplied by the caller.
pub fn compose_with<L>(frame: &FrameSnapshot, pixel_ratio: f64, mut lookup: L) -> RenderImage
where
    L: FnMut(u32, &mut dyn FnMut(Option<&PreviewImage>, Option<&PartialImage>)),
{
    let width = (frame.viewport.width * pixel_ratio).round().max(0.0) as u32;
    let height = (frame.viewport.height * pixel_ratio).round().max(0.0) as u32;
    let mut canvas = Canvas::new(width, height, frame.background);
    let transform = Transform::new(
        frame.transform.scale * pixel_ratio,
        frame.transform.translate_x * pixel_ratio,
        frame.transform.translate_y * pixel_ratio,
    );

    for page in &frame.pages {
        lookup(
            page.page_number,
            &mut |preview: Option<&PreviewImage>, partial: Option<&PartialImage>| {
                paint_page(&mut canvas, &transform, page, preview, partial)
            },
        );
    }
    paint_highlights(&mut canvas, &transform, &frame.highlights);
    canvas.into_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pageview_core::image_cache::PixelRegion;
    use pageview_core::{PageInfo, Size};

    const BACKGROUND: [u8; 4] = [10, 10, 10, 255];

    fn page(width: f64, height: f64) -> VisiblePage {
        VisiblePage {
            page_number: 1,
            rect: Rect::new(2.0, 2.0, 2.0 + width, 2.0 + height),
            info: PageInfo::new(1, width, height),
        }
    }

    fn frame(pages: Vec<VisiblePage>, highlights: Vec<Rect>) -> FrameSnapshot {
        FrameSnapshot {
            viewport: Size::new(20.0, 20.0),
            transform: Transform::IDENTITY,
            background: BACKGROUND,
            pages,
            highlights,
            failure: None,
        }
    }

    #[test]
    fn pages_without_bitmaps_show_paper() {
        let frame = frame(vec![page(10.0, 10.0)], Vec::new());
        let image = compose_with(&frame, 1.0, |_, paint| paint(None, None));
        let canvas = Canvas {
            width: image.width,
            height: image.height,
            pixels: image.pixels,
        };
        assert_eq!(canvas.pixel(0, 0), BACKGROUND);
        assert_eq!(canvas.pixel(5, 5), PAPER);
        assert_eq!(canvas.pixel(12, 12), BACKGROUND);
    }

    #[test]
    fn partial_overrides_preview_inside_its_region() {
        let preview = PreviewImage {
            image: RenderImage::filled(10, 10, [1, 1, 1, 255]),
            scale: 1.0,
        };
        let partial = PartialImage {
            image: RenderImage::filled(8, 8, [2, 2, 2, 255]),
            scale: 2.0,
            region: PixelRegion {
                x: 0,
                y: 0,
                width: 8,
                height: 8,
            },
        };
        let frame = frame(vec![page(10.0, 10.0)], Vec::new());
        let image = compose_with(&frame, 1.0, |_, paint| paint(Some(&preview), Some(&partial)));
        let canvas = Canvas {
            width: image.width,
            height: image.height,
            pixels: image.pixels,
        };
        // partial covers page-local [0, 4) on both axes
        assert_eq!(canvas.pixel(3, 3), [2, 2, 2, 255]);
        assert_eq!(canvas.pixel(9, 9), [1, 1, 1, 255]);
    }

    #[test]
    fn highlights_blend_over_pages() {
        let frame = frame(
            vec![page(10.0, 10.0)],
            vec![Rect::new(2.0, 2.0, 6.0, 6.0)],
        );
        let image = compose_with(&frame, 2.0, |_, paint| paint(None, None));
        assert_eq!((image.width, image.height), (40, 40));
        let canvas = Canvas {
            width: image.width,
            height: image.height,
            pixels: image.pixels,
        };
        let highlighted = canvas.pixel(6, 6);
        assert!(highlighted[0] < 255 && highlighted[2] > highlighted[0]);
        assert_eq!(canvas.pixel(16, 16), PAPER);
    }
}
