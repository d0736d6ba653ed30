use thiserror::Error;

/// Native sample storage of a decoded image, interleaved and row-major
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::U8(v) => v.len(),
            Samples::U16(v) => v.len(),
            Samples::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample `i` on its native scale, as `f32`
    #[inline]
    pub fn get(&self, i: usize) -> f32 {
        match self {
            Samples::U8(v) => v[i] as f32,
            Samples::U16(v) => v[i] as f32,
            Samples::F32(v) => v[i],
        }
    }
}

/// Decoded image, tagged by channel layout
#[derive(Debug, Clone, PartialEq)]
pub enum SourceImage {
    Gray {
        width: usize,
        height: usize,
        samples: Samples,
    },
    /// Interleaved color; the first three channels are read as R, G, B
    Color {
        width: usize,
        height: usize,
        channels: usize,
        samples: Samples,
    },
}

/// A [`SourceImage`] whose fields disagree with its sample buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("color image needs at least 3 channels, got {0}")]
    TooFewChannels(usize),

    #[error("{width}x{height} image with {channels} channels needs {expected} samples, got {actual}")]
    SampleCount {
        width: usize,
        height: usize,
        channels: usize,
        expected: usize,
        actual: usize,
    },

    #[error("image size {width}x{height} with {channels} channels overflows")]
    Overflow { width: usize, height: usize, channels: usize },
}

impl SourceImage {
    /// Check that the sample buffer holds exactly `width * height * channels` samples
    pub fn validate(&self) -> Result<(), LayoutError> {
        let (width, height) = self.dimensions();
        let channels = self.channels();
        let samples = match self {
            SourceImage::Gray { samples, .. } => samples,
            SourceImage::Color { samples, .. } => {
                if channels < 3 {
                    return Err(LayoutError::TooFewChannels(channels));
                }
                samples
            }
        };
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(channels))
            .ok_or(LayoutError::Overflow { width, height, channels })?;
        if samples.len() != expected {
            return Err(LayoutError::SampleCount { width, height, channels, expected, actual: samples.len() });
        }
        Ok(())
    }

    pub fn dimensions(&self) -> (usize, usize) {
        match self {
            SourceImage::Gray { width, height, .. } | SourceImage::Color { width, height, .. } => {
                (*width, *height)
            }
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            SourceImage::Gray { .. } => 1,
            SourceImage::Color { channels, .. } => *channels,
        }
    }
}

/// Row-major single-channel `f32` image, the extractor's input form
#[derive(Debug, Clone, PartialEq)]
pub struct FloatImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl FloatImage {
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}
