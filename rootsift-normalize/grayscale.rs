use rayon::prelude::*;
use rootsift_core::{FloatImage, LayoutError, Samples, SourceImage};

/// Rec. 601 luma weights for R, G, B
pub const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// Convert a decoded image to the single-channel `f32` form the extractor expects.
///
/// Gray samples are cast directly; color samples are combined with [`LUMA_WEIGHTS`] on
/// their native scale (0-255 for 8-bit, 0-65535 for 16-bit). Channels past the third
/// (alpha) are ignored. Dimensions are preserved.
///
/// Fails when the sample buffer does not match the declared layout.
pub fn to_grayscale(image: &SourceImage) -> Result<FloatImage, LayoutError> {
    image.validate()?;
    Ok(match image {
        SourceImage::Gray { width, height, samples } => FloatImage {
            width: *width,
            height: *height,
            data: gray_to_f32(samples),
        },
        SourceImage::Color { width, height, channels, samples } => FloatImage {
            width: *width,
            height: *height,
            data: color_to_luma(samples, *width, *height, *channels),
        },
    })
}

fn gray_to_f32(samples: &Samples) -> Vec<f32> {
    match samples {
        Samples::U8(v) => v.iter().map(|&s| s as f32).collect(),
        Samples::U16(v) => v.iter().map(|&s| s as f32).collect(),
        Samples::F32(v) => v.clone(),
    }
}

/// Caller guarantees `channels >= 3` and `samples.len() == width * height * channels`
fn color_to_luma(samples: &Samples, width: usize, height: usize, channels: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; width * height];
    if width == 0 {
        return out;
    }

    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let row_start = y * width * channels;
        for (x, px) in row.iter_mut().enumerate() {
            let i = row_start + x * channels;
            *px = LUMA_WEIGHTS[0] * samples.get(i)
                + LUMA_WEIGHTS[1] * samples.get(i + 1)
                + LUMA_WEIGHTS[2] * samples.get(i + 2);
        }
    });
    out
}
