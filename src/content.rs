//! File content inspection used when a download is finalized

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use log::debug;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

/// Raster formats the shell's image loader can thumbnail
pub const RASTER_IMAGE_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/bmp",
    "image/x-bmp",
    "image/x-icon",
    "image/vnd.microsoft.icon",
    "image/tiff",
    "image/webp",
    "image/x-portable-anymap",
    "image/x-portable-bitmap",
    "image/x-portable-graymap",
    "image/x-portable-pixmap",
    "image/x-tga",
    "image/x-xbitmap",
    "image/x-xpixmap",
];

const SNIFF_LEN: usize = 16;

/// Size of the journal preview; larger images are scaled down to fit
pub const PREVIEW_WIDTH: u32 = 300;
pub const PREVIEW_HEIGHT: u32 = 225;

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"%PDF-", "application/pdf"),
    (b"\x1f\x8b", "application/x-gzip"),
    (b"OggS", "application/ogg"),
    (b"PK\x03\x04", "application/zip"),
];

/// Questions a download asks about its finished file
pub trait ContentInspector: Send + Sync {
    /// Best guess of the MIME type from the file's content
    fn sniff_mime_type(&self, path: &Path) -> Option<String>;

    fn is_raster_image(&self, mime_type: &str) -> bool {
        RASTER_IMAGE_MIME_TYPES.contains(&mime_type)
    }

    /// PNG bytes of a thumbnail for the file, if one can be made
    fn render_preview(&self, _path: &Path) -> Option<Vec<u8>> {
        None
    }
}

/// Magic-number sniffing over the first bytes of the file
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureInspector;

impl ContentInspector for SignatureInspector {
    fn sniff_mime_type(&self, path: &Path) -> Option<String> {
        let mut head = [0u8; SNIFF_LEN];
        let mut file = File::open(path).ok()?;
        let read = file.read(&mut head).ok()?;
        sniff_bytes(&head[..read]).map(str::to_string)
    }

    fn render_preview(&self, path: &Path) -> Option<Vec<u8>> {
        match render_preview_png(path) {
            Ok(png) => Some(png),
            Err(e) => {
                debug!("preview_failed: {} {}", path.display(), e);
                None
            }
        }
    }
}

/// Letterbox the image at `path` onto a white 300x225 canvas and encode it as PNG.
///
/// Images that already fit keep their size and are centred.
pub fn render_preview_png(path: &Path) -> Result<Vec<u8>, image::ImageError> {
    let bytes = std::fs::read(path)?;
    let source = image::load_from_memory(&bytes)?;
    let (width, height) = source.dimensions();

    let scaled = if width > PREVIEW_WIDTH || height > PREVIEW_HEIGHT {
        let scale = f64::min(
            f64::from(PREVIEW_WIDTH) / f64::from(width),
            f64::from(PREVIEW_HEIGHT) / f64::from(height),
        );
        let fit = |side: u32, max: u32| ((f64::from(side) * scale).round() as u32).clamp(1, max);
        source.resize_exact(
            fit(width, PREVIEW_WIDTH),
            fit(height, PREVIEW_HEIGHT),
            FilterType::Triangle,
        )
    } else {
        source
    };

    let white = Rgba([255, 255, 255, 255]);
    let mut canvas = RgbaImage::from_pixel(PREVIEW_WIDTH, PREVIEW_HEIGHT, white);
    let x = (PREVIEW_WIDTH - scaled.width()) / 2;
    let y = (PREVIEW_HEIGHT - scaled.height()) / 2;
    imageops::overlay(&mut canvas, &scaled.to_rgba8(), i64::from(x), i64::from(y));

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(canvas).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

pub fn sniff_bytes(head: &[u8]) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|(magic, _)| head.starts_with(magic))
        .map(|(_, mime)| *mime)
}
