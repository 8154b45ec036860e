use image::RgbaImage;
use pageview_core::{PageInfo, RegionRenderRequest, RenderImage};
use rayon::prelude::*;

/// Copies the `(x, y, width, height)` region out of a full-page bitmap. Pixels
/// outside the bitmap are filled with `background`.
pub fn crop_region(
    full: &RgbaImage,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    background: [u8; 4],
) -> RenderImage {
    let mut out = RenderImage::filled(width, height, background);
    let stride = width as usize * 4;
    if stride == 0 {
        return out;
    }
    out.pixels
        .par_chunks_exact_mut(stride)
        .enumerate()
        .for_each(|(row, line)| {
            let source_y = y as i64 + row as i64;
            if source_y < 0 || source_y >= full.height() as i64 {
                return;
            }
            for column in 0..width as usize {
                let source_x = x as i64 + column as i64;
                if source_x < 0 || source_x >= full.width() as i64 {
                    continue;
                }
                let pixel = full.get_pixel(source_x as u32, source_y as u32);
                line[column * 4..column * 4 + 4].copy_from_slice(&pixel.0);
            }
        });
    out
}

/// Affine matrix `[a, b, c, d, e, f]` taking page points (top-left origin) to the
/// pixels of the requested region: the page is scaled to its full render size and
/// the region origin is moved to the bitmap origin. `None` for degenerate pages.
pub fn region_matrix(request: &RegionRenderRequest, page: &PageInfo) -> Option<[f32; 6]> {
    if page.width <= 0.0 || page.height <= 0.0 || request.width == 0 || request.height == 0 {
        return None;
    }
    let scale_x = request.full_width as f64 / page.width;
    let scale_y = request.full_height as f64 / page.height;
    Some([
        scale_x as f32,
        0.0,
        0.0,
        scale_y as f32,
        -(request.x as f32),
        -(request.y as f32),
    ])
}

/// Inverts the color channels of an RGBA buffer, leaving alpha alone.
pub fn invert_pixels(pixels: &mut [u8]) {
    pixels.par_chunks_exact_mut(4).for_each(|chunk| {
        chunk[0] = 255 - chunk[0];
        chunk[1] = 255 - chunk[1];
        chunk[2] = 255 - chunk[2];
    });
}

/// Rec. 601 luma, applied in place.
pub fn grayscale_pixels(pixels: &mut [u8]) {
    pixels.par_chunks_exact_mut(4).for_each(|chunk| {
        let luma = 0.299 * chunk[0] as f32 + 0.587 * chunk[1] as f32 + 0.114 * chunk[2] as f32;
        let luma = luma.round().clamp(0.0, 255.0) as u8;
        chunk[0] = luma;
        chunk[1] = luma;
        chunk[2] = luma;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 0, 255]))
    }

    #[test]
    fn crop_copies_the_requested_window() {
        let full = gradient(10, 8);
        let region = crop_region(&full, 2, 3, 4, 2, [9, 9, 9, 255]);
        assert_eq!((region.width, region.height), (4, 2));
        assert_eq!(&region.pixels[0..4], &[2, 3, 0, 255]);
        let last = region.pixels.len() - 4;
        assert_eq!(&region.pixels[last..], &[5, 4, 0, 255]);
    }

    #[test]
    fn crop_outside_the_page_uses_background() {
        let full = gradient(4, 4);
        let region = crop_region(&full, -2, 3, 4, 2, [9, 9, 9, 255]);
        assert_eq!(&region.pixels[0..4], &[9, 9, 9, 255]);
        assert_eq!(&region.pixels[8..12], &[0, 3, 0, 255]);
        // second row falls below the bitmap
        assert!(region.pixels[16..].chunks(4).all(|p| p == [9, 9, 9, 255]));
    }

    fn region_request(x: i32, y: i32, width: u32, height: u32) -> RegionRenderRequest {
        RegionRenderRequest {
            page_number: 1,
            x,
            y,
            width,
            height,
            full_width: 1200,
            full_height: 1600,
            background: [255, 255, 255, 255],
            annotation_mode: Default::default(),
            flags: Default::default(),
        }
    }

    fn apply(matrix: [f32; 6], x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = matrix;
        (a * x + c * y + e, b * x + d * y + f)
    }

    #[test]
    fn region_matrix_maps_the_region_corners_onto_the_bitmap() {
        let page = PageInfo::new(1, 600.0, 800.0);
        let matrix = region_matrix(&region_request(300, 400, 200, 100), &page).unwrap();
        assert_eq!(apply(matrix, 150.0, 200.0), (0.0, 0.0));
        assert_eq!(apply(matrix, 250.0, 250.0), (200.0, 100.0));
        // page origin lands above and left of the bitmap
        assert_eq!(apply(matrix, 0.0, 0.0), (-300.0, -400.0));
    }

    #[test]
    fn region_matrix_rejects_degenerate_input() {
        let page = PageInfo::new(1, 600.0, 800.0);
        assert!(region_matrix(&region_request(0, 0, 0, 10), &page).is_none());
        assert!(region_matrix(&region_request(0, 0, 10, 10), &PageInfo::new(1, 0.0, 800.0)).is_none());
    }

    #[test]
    fn invert_and_grayscale_keep_alpha() {
        let mut pixels = vec![10, 20, 30, 128, 255, 255, 255, 255];
        invert_pixels(&mut pixels);
        assert_eq!(pixels, vec![245, 235, 225, 128, 0, 0, 0, 255]);

        let mut pixels = vec![255, 0, 0, 7];
        grayscale_pixels(&mut pixels);
        assert_eq!(pixels, vec![76, 76, 76, 7]);
    }
}
