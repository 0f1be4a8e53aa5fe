//! Image format detection.
//!
//! Detection runs an ordered list of [`FormatProbe`]s and stops at the first
//! one that recognises the bytes. The magic-byte sniff runs first because it
//! is cheap and exact; the `image` crate's guesser is the fallback.

use image::ImageFormat;

/// Image formats the pipeline can decode and forward to inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Tiff,
}

impl ImageKind {
    /// The `image` crate format used to decode this kind.
    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::Gif => ImageFormat::Gif,
            Self::Webp => ImageFormat::WebP,
            Self::Bmp => ImageFormat::Bmp,
            Self::Tiff => ImageFormat::Tiff,
        }
    }

    fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Gif => Some(Self::Gif),
            ImageFormat::WebP => Some(Self::Webp),
            ImageFormat::Bmp => Some(Self::Bmp),
            ImageFormat::Tiff => Some(Self::Tiff),
            _ => None,
        }
    }
}

/// Why a byte buffer could not be classified as a supported image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("image data is empty")]
    Empty,

    #[error("unrecognized image format")]
    Unrecognized,
}

/// One detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatProbe {
    /// Match well-known file signatures.
    MagicBytes,
    /// Ask the `image` crate to guess from its own signature table.
    Decoder,
}

/// Probes in the order [`detect`] runs them.
pub const PROBE_ORDER: &[FormatProbe] = &[FormatProbe::MagicBytes, FormatProbe::Decoder];

impl FormatProbe {
    pub fn probe(self, bytes: &[u8]) -> Option<ImageKind> {
        match self {
            Self::MagicBytes => sniff_magic(bytes),
            Self::Decoder => image::guess_format(bytes)
                .ok()
                .and_then(ImageKind::from_image_format),
        }
    }
}

/// Classify `bytes`, short-circuiting on the first probe that succeeds.
pub fn detect(bytes: &[u8]) -> Result<ImageKind, FormatError> {
    if bytes.is_empty() {
        return Err(FormatError::Empty);
    }
    PROBE_ORDER
        .iter()
        .find_map(|probe| probe.probe(bytes))
        .ok_or(FormatError::Unrecognized)
}

fn sniff_magic(bytes: &[u8]) -> Option<ImageKind> {
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageKind::Jpeg)
    } else if bytes.starts_with(PNG) {
        Some(ImageKind::Png)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageKind::Gif)
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(ImageKind::Webp)
    } else if bytes.starts_with(b"BM") {
        Some(ImageKind::Bmp)
    } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        Some(ImageKind::Tiff)
    } else {
        None
    }
}
