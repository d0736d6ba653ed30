use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::{DynamicImage, ImageError, ImageReader};
use rootsift_core::{ImageSource, Samples, SourceImage, TaskError, TaskResult};

/// Decodes images from disk with the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageSource;

impl ImageSource for FsImageSource {
    fn load(&self, path: &Path) -> TaskResult<SourceImage> {
        let image = load_dynamic_image(path).map_err(|e| match e {
            ImageError::IoError(source) => TaskError::io(path, source),
            other => TaskError::Decode { path: path.to_path_buf(), source: Box::new(other) },
        })?;
        Ok(source_image_from_dynamic(image))
    }
}

/// Opens by extension first and retries with content sniffing, so a JPEG stored
/// under a `.png` name still decodes.
fn load_dynamic_image(path: &Path) -> Result<DynamicImage, ImageError> {
    match image::open(path) {
        Ok(img) => Ok(img),
        Err(err) if should_retry(&err) => {
            tracing::warn!(
                "Standard decode failed for {} ({err}). Retrying with format sniffing.",
                path.display()
            );
            let reader = ImageReader::new(BufReader::new(File::open(path)?)).with_guessed_format()?;
            reader.decode()
        }
        Err(err) => Err(err),
    }
}

fn should_retry(err: &ImageError) -> bool {
    matches!(err, ImageError::Decoding(_) | ImageError::Unsupported(_))
}

/// Resolve the decoder's pixel type into a tagged sample buffer, keeping native samples
pub fn source_image_from_dynamic(image: DynamicImage) -> SourceImage {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let gray = |samples| SourceImage::Gray { width, height, samples };
    let color = |channels, samples| SourceImage::Color { width, height, channels, samples };

    match image {
        DynamicImage::ImageLuma8(buf) => gray(Samples::U8(buf.into_raw())),
        DynamicImage::ImageLuma16(buf) => gray(Samples::U16(buf.into_raw())),
        DynamicImage::ImageLumaA8(buf) => gray(Samples::U8(buf.into_raw().into_iter().step_by(2).collect())),
        DynamicImage::ImageLumaA16(buf) => gray(Samples::U16(buf.into_raw().into_iter().step_by(2).collect())),
        DynamicImage::ImageRgb8(buf) => color(3, Samples::U8(buf.into_raw())),
        DynamicImage::ImageRgba8(buf) => color(4, Samples::U8(buf.into_raw())),
        DynamicImage::ImageRgb16(buf) => color(3, Samples::U16(buf.into_raw())),
        DynamicImage::ImageRgba16(buf) => color(4, Samples::U16(buf.into_raw())),
        DynamicImage::ImageRgb32F(buf) => color(3, Samples::F32(buf.into_raw())),
        DynamicImage::ImageRgba32F(buf) => color(4, Samples::F32(buf.into_raw())),
        other => color(3, Samples::F32(other.into_rgb32f().into_raw())),
    }
}
