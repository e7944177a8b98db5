//! Thumbnails from embedded icons.

use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use std::io::Cursor;
use std::path::Path;

/// Edge length of the freedesktop "normal" thumbnail size.
pub const THUMBNAIL_SIZE: u32 = 128;

/// Decode `icon` and fit it into the thumbnail box. Smaller icons are kept.
pub fn make_thumbnail(icon: &[u8]) -> image::ImageResult<DynamicImage> {
    let img = image::load_from_memory(icon)?;
    if img.width() <= THUMBNAIL_SIZE && img.height() <= THUMBNAIL_SIZE {
        return Ok(img);
    }
    Ok(img.resize(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::CatmullRom))
}

pub fn write_png(img: &DynamicImage, path: &Path) -> std::io::Result<()> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .map_err(std::io::Error::other)?;
    crate::desktop_entry::write_atomic(path, &buf)
}
