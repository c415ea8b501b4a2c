//! PNG decode/encode between files and RGBA f32 host images.
//!
//! Device images are linear-light RGBA f32. Reading with [`ColorSpace::Srgb`]
//! decodes the sRGB transfer curve; writing with it re-encodes before
//! quantizing to 8 bits.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::str::FromStr;

use cascade_core::ImageSize;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ComputeError, ComputeResult};

/// Transfer encoding of file pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    /// Values stored as-is.
    Linear,
    /// sRGB transfer curve.
    #[default]
    Srgb,
}

impl ColorSpace {
    /// Maps a `colorspace` choice index (`linear`, `srgb`).
    pub fn from_choice(index: usize) -> Self {
        match index {
            0 => Self::Linear,
            _ => Self::Srgb,
        }
    }

    fn to_linear(self, v: f32) -> f32 {
        match self {
            Self::Linear => v,
            Self::Srgb => srgb_to_linear(v),
        }
    }

    fn from_linear(self, v: f32) -> f32 {
        match self {
            Self::Linear => v,
            Self::Srgb => linear_to_srgb(v),
        }
    }
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Linear => "linear",
            Self::Srgb => "srgb",
        })
    }
}

impl FromStr for ColorSpace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "srgb" => Ok(Self::Srgb),
            other => Err(format!("unknown color space '{other}'")),
        }
    }
}

/// sRGB EOTF.
pub fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// sRGB inverse EOTF.
pub fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.0031308 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// RGBA f32 pixels in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct HostImage {
    size: ImageSize,
    pixels: Vec<f32>,
}

impl HostImage {
    /// Wraps `pixels`, which must hold `size.pixel_count() * 4` floats.
    pub fn new(size: ImageSize, pixels: Vec<f32>) -> ComputeResult<Self> {
        let expected = size.pixel_count() * 4;
        if pixels.len() != expected {
            return Err(ComputeError::BufferSizeMismatch { expected, actual: pixels.len() });
        }
        Ok(Self { size, pixels })
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<f32> {
        self.pixels
    }
}

/// Reads a PNG file into linear RGBA f32.
///
/// Palette and sub-byte images are expanded to 8 bits. Grayscale is
/// replicated to RGB; missing alpha becomes 1.0. Alpha is never
/// transfer-decoded.
pub fn read_image(path: &Path, color_space: ColorSpace) -> ComputeResult<HostImage> {
    let io_err = |source| ComputeError::Io { path: path.to_path_buf(), source };
    let decode_err = |e: png::DecodingError| ComputeError::Decode { path: path.to_path_buf(), reason: e.to_string() };

    let file = File::open(path).map_err(io_err)?;
    let mut decoder = png::Decoder::new(BufReader::new(file));
    decoder.set_transformations(png::Transformations::EXPAND);
    let mut reader = decoder.read_info().map_err(decode_err)?;

    let buf_size = reader.output_buffer_size().ok_or_else(|| ComputeError::Decode {
        path: path.to_path_buf(),
        reason: "cannot determine output buffer size".into(),
    })?;
    let mut buf = vec![0u8; buf_size];
    let info = reader.next_frame(&mut buf).map_err(decode_err)?;
    let bytes = &buf[..info.buffer_size()];

    let channels = match info.color_type {
        png::ColorType::Grayscale => 1,
        png::ColorType::GrayscaleAlpha => 2,
        png::ColorType::Rgb => 3,
        png::ColorType::Rgba => 4,
        other => {
            return Err(ComputeError::Decode {
                path: path.to_path_buf(),
                reason: format!("unsupported color type {other:?}"),
            });
        }
    };
    let samples: Vec<f32> = match info.bit_depth {
        png::BitDepth::Eight => bytes.iter().map(|&b| b as f32 / 255.0).collect(),
        png::BitDepth::Sixteen => bytes
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]) as f32 / 65535.0)
            .collect(),
        other => {
            return Err(ComputeError::Decode {
                path: path.to_path_buf(),
                reason: format!("unsupported bit depth {other:?}"),
            });
        }
    };

    let size = ImageSize::new(info.width, info.height);
    let mut pixels = Vec::with_capacity(size.pixel_count() * 4);
    for px in samples.chunks_exact(channels) {
        let (rgb, a) = match channels {
            1 => ([px[0]; 3], 1.0),
            2 => ([px[0]; 3], px[1]),
            3 => ([px[0], px[1], px[2]], 1.0),
            _ => ([px[0], px[1], px[2]], px[3]),
        };
        pixels.extend(rgb.map(|v| color_space.to_linear(v)));
        pixels.push(a);
    }

    debug!(path = %path.display(), %size, ?color_space, "decoded png");
    HostImage::new(size, pixels)
}

/// Writes linear RGBA f32 as an 8-bit RGBA PNG.
pub fn write_image(path: &Path, image: &HostImage, color_space: ColorSpace) -> ComputeResult<()> {
    let encode_err = |e: png::EncodingError| ComputeError::Encode { path: path.to_path_buf(), reason: e.to_string() };

    let file = File::create(path).map_err(|source| ComputeError::Io { path: path.to_path_buf(), source })?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, image.size.width, image.size.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::default());
    if color_space == ColorSpace::Srgb {
        encoder.set_source_srgb(png::SrgbRenderingIntent::Perceptual);
    }

    let mut png_writer = encoder.write_header().map_err(encode_err)?;

    let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    let data: Vec<u8> = image
        .pixels
        .chunks_exact(4)
        .flat_map(|px| {
            [
                quantize(color_space.from_linear(px[0])),
                quantize(color_space.from_linear(px[1])),
                quantize(color_space.from_linear(px[2])),
                quantize(px[3]),
            ]
        })
        .collect();

    png_writer.write_image_data(&data).map_err(encode_err)?;
    png_writer.finish().map_err(encode_err)?;

    debug!(path = %path.display(), size = %image.size, ?color_space, "encoded png");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_srgb_curve() {
        for v in [0.0, 0.002, 0.2, 0.5, 1.0] {
            assert_abs_diff_eq!(srgb_to_linear(linear_to_srgb(v)), v, epsilon = 1e-5);
        }
        assert_abs_diff_eq!(srgb_to_linear(0.5), 0.214, epsilon = 1e-3);
    }

    #[test]
    fn test_png_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.png");
        let size = ImageSize::new(3, 2);
        let pixels: Vec<f32> = (0..size.pixel_count())
            .flat_map(|i| [i as f32 / 5.0, 0.5, 1.0 - i as f32 / 5.0, 1.0])
            .collect();
        let image = HostImage::new(size, pixels.clone()).unwrap();

        write_image(&path, &image, ColorSpace::Srgb).unwrap();
        let back = read_image(&path, ColorSpace::Srgb).unwrap();
        assert_eq!(back.size(), size);
        for (a, b) in back.pixels().iter().zip(&pixels) {
            // 8-bit sRGB quantization error stays well below 1%
            assert_abs_diff_eq!(*a, *b, epsilon = 0.01);
        }
    }

    #[test]
    fn test_missing_file() {
        let err = read_image(Path::new("/nonexistent/frame.png"), ColorSpace::Linear).unwrap_err();
        assert!(err.is_io());
        assert!(matches!(err, ComputeError::Io { .. }));
    }

    #[test]
    fn test_host_image_length() {
        assert!(HostImage::new(ImageSize::new(2, 2), vec![0.0; 15]).is_err());
    }
}
