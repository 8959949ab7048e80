use image::{imageops, DynamicImage, GrayImage, Luma, RgbaImage};

/// Gaussian blur sigma used for denoising.
const DENOISE_SIGMA: f32 = 0.3;

/// Contrast enhancement factor (1.0 = unchanged).
const CONTRAST_FACTOR: f32 = 1.2;

/// Unsharp-mask sigma and threshold.
const SHARPEN_SIGMA: f32 = 0.5;
const SHARPEN_THRESHOLD: i32 = 2;

/// Prepares a captured frame for OCR.
///
/// Steps, in order: grayscale, very mild blur, conservative contrast stretch,
/// subtle unsharp mask. The output always has exactly the input's dimensions;
/// resizing adds synthetic pixels that make Tesseract worse, so no step here
/// may scale the image.
pub fn preprocess(img: RgbaImage) -> GrayImage {
    let gray = DynamicImage::ImageRgba8(img).into_luma8();

    // Filters below index neighbouring pixels; nothing to do for empty frames
    if gray.width() == 0 || gray.height() == 0 {
        return gray;
    }

    let denoised = imageops::blur(&gray, DENOISE_SIGMA);
    let contrasted = enhance_contrast(&denoised, CONTRAST_FACTOR);
    imageops::unsharpen(&contrasted, SHARPEN_SIGMA, SHARPEN_THRESHOLD)
}

/// Stretches each pixel away from the image's mean luminance by `factor`.
///
/// Anchoring on the mean (rather than mid-gray) keeps a mostly-white crop
/// from being pushed darker as a whole.
pub fn enhance_contrast(img: &GrayImage, factor: f32) -> GrayImage {
    let pixel_count = img.width() as u64 * img.height() as u64;
    if pixel_count == 0 {
        return img.clone();
    }

    let sum: u64 = img.pixels().map(|p| p[0] as u64).sum();
    let mean = (sum as f32 / pixel_count as f32 + 0.5).floor();

    let (width, height) = img.dimensions();
    let mut output = GrayImage::new(width, height);
    for (x, y, pixel) in img.enumerate_pixels() {
        let value = mean + factor * (pixel[0] as f32 - mean);
        output.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checkerboard(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if (x / 3 + y / 3) % 2 == 0 {
                Rgba([240, 240, 240, 255])
            } else {
                Rgba([20, 20, 20, 255])
            }
        })
    }

    #[test]
    fn test_preprocess_keeps_dimensions() {
        for (w, h) in [(1, 1), (1, 17), (33, 1), (64, 48), (301, 19)] {
            let out = preprocess(checkerboard(w, h));
            assert_eq!(out.dimensions(), (w, h), "size changed for {}x{}", w, h);
        }
    }

    #[test]
    fn test_preprocess_handles_degenerate_input() {
        let empty = RgbaImage::new(0, 0);
        assert_eq!(preprocess(empty).dimensions(), (0, 0));

        let black = RgbaImage::from_pixel(20, 10, Rgba([0, 0, 0, 255]));
        let out = preprocess(black);
        assert_eq!(out.dimensions(), (20, 10));
        assert!(out.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_contrast_stretches_around_mean() {
        let mut img = GrayImage::new(2, 1);
        img.put_pixel(0, 0, Luma([100]));
        img.put_pixel(1, 0, Luma([200]));

        let out = enhance_contrast(&img, 1.2);
        // mean = 150: 150 + 1.2 * (100 - 150) = 90, 150 + 1.2 * 50 = 210
        assert_eq!(out.get_pixel(0, 0)[0], 90);
        assert_eq!(out.get_pixel(1, 0)[0], 210);
    }

    #[test]
    fn test_contrast_clamps() {
        let mut img = GrayImage::new(2, 1);
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(1, 0, Luma([255]));

        let out = enhance_contrast(&img, 3.0);
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn test_uniform_image_unchanged_by_contrast() {
        let img = GrayImage::from_pixel(4, 4, Luma([128]));
        let out = enhance_contrast(&img, 1.2);
        assert!(out.pixels().all(|p| p[0] == 128));
    }
}
