//! Raw archive frames to padded RGB images.

use image::{Rgb, RgbImage};
use ndarray::ArrayView3;

/// Convert an `H × W × 3` float frame to an 8-bit image.
///
/// Returns `None` for all-zero frames (missing camera). Values are scaled by
/// 255 when the frame's maximum is at most 1.
pub(crate) fn frame_to_image(frame: ArrayView3<'_, f32>) -> Option<RgbImage> {
    if frame.iter().all(|&v| v == 0.0) {
        return None;
    }
    let max = frame.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let scale = if max <= 1.0 { 255.0 } else { 1.0 };

    let (height, width, _) = frame.dim();
    let buf: Vec<u8> = frame.iter().map(|&v| (v * scale) as u8).collect();
    RgbImage::from_raw(width as u32, height as u32, buf)
}

/// Swap BGR and RGB in place.
pub(crate) fn reverse_channels(image: &mut RgbImage) {
    for pixel in image.pixels_mut() {
        pixel.0.reverse();
    }
}

/// Pad to a centred square filled with `mean` (per-channel, `[0, 1]`).
pub(crate) fn expand_to_square(image: RgbImage, mean: [f32; 3]) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == height {
        return image;
    }
    let side = width.max(height);
    let fill = Rgb(mean.map(|m| (m * 255.0) as u8));
    let mut canvas = RgbImage::from_pixel(side, side, fill);
    let x = i64::from((side - width) / 2);
    let y = i64::from((side - height) / 2);
    image::imageops::replace(&mut canvas, &image, x, y);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_zero_frame_skipped() {
        let frame = Array3::<f32>::zeros((2, 2, 3));
        assert!(frame_to_image(frame.view()).is_none());
    }

    #[test]
    fn test_unit_range_scaled() {
        let mut frame = Array3::<f32>::zeros((1, 2, 3));
        frame[[0, 0, 0]] = 1.0;
        frame[[0, 1, 2]] = 0.5;
        let image = frame_to_image(frame.view()).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 127]);
    }

    #[test]
    fn test_byte_range_kept() {
        let frame = Array3::<f32>::from_elem((1, 1, 3), 200.0);
        let image = frame_to_image(frame.view()).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [200, 200, 200]);
    }

    #[test]
    fn test_reverse_channels() {
        let mut image = RgbImage::from_pixel(1, 1, Rgb([1, 2, 3]));
        reverse_channels(&mut image);
        assert_eq!(image.get_pixel(0, 0).0, [3, 2, 1]);
    }

    #[test]
    fn test_expand_to_square_pads_with_mean() {
        let image = RgbImage::from_pixel(4, 2, Rgb([9, 9, 9]));
        let square = expand_to_square(image, [0.5, 0.0, 1.0]);
        assert_eq!(square.dimensions(), (4, 4));
        assert_eq!(square.get_pixel(0, 0).0, [127, 0, 255]);
        assert_eq!(square.get_pixel(0, 1).0, [9, 9, 9]);
        assert_eq!(square.get_pixel(3, 2).0, [9, 9, 9]);
        assert_eq!(square.get_pixel(3, 3).0, [127, 0, 255]);
    }
}
