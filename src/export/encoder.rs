use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::plan::PageSize;
use crate::constants::{EXPORT_FILE_PREFIX, JPEG_QUALITY};

/// Embeds a raster into an exportable file and persists it
pub trait DocumentEncoder: Send + Sync {
    fn encode(&self, image: &RgbImage, page: PageSize) -> Result<PathBuf>;
}

// Written next to the image so the print size travels with it
#[derive(Debug, Serialize)]
struct PageManifest<'a> {
    image: &'a str,
    page_width_mm: f64,
    page_height_mm: f64,
    pixel_width: u32,
    pixel_height: u32,
    created_at: DateTime<Utc>,
}

/// Writes `map-<timestamp>.jpg` plus a `.json` page manifest
#[derive(Debug, Clone)]
pub struct JpegDocumentEncoder {
    output_dir: PathBuf,
}

impl JpegDocumentEncoder {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl DocumentEncoder for JpegDocumentEncoder {
    fn encode(&self, image: &RgbImage, page: PageSize) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Creating output directory {}", self.output_dir.display()))?;

        let created_at = Utc::now();
        let stem = format!("{}-{}", EXPORT_FILE_PREFIX, created_at.format("%Y%m%d-%H%M%S-%3f"));
        let image_path = self.output_dir.join(format!("{}.jpg", stem));
        let manifest_path = self.output_dir.join(format!("{}.json", stem));

        let file = File::create(&image_path)
            .with_context(|| format!("Failed to create {}", image_path.display()))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
            .encode_image(image)
            .with_context(|| "Failed to encode JPEG")?;
        writer.flush().context("Failed to flush JPEG")?;

        let image_name = format!("{}.jpg", stem);
        let manifest = PageManifest {
            image: &image_name,
            page_width_mm: page.width_mm,
            page_height_mm: page.height_mm,
            pixel_width: image.width(),
            pixel_height: image.height(),
            created_at,
        };
        let manifest_file = File::create(&manifest_path)
            .with_context(|| format!("Failed to create {}", manifest_path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(manifest_file), &manifest)
            .context("Failed to write page manifest")?;

        info!("Exported {}x{} map to {}", image.width(), image.height(), image_path.display());
        Ok(image_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_image_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = JpegDocumentEncoder::new(dir.path().join("out"));

        let path = encoder.encode(&RgbImage::new(40, 30), PageSize::new(297.0, 210.0)).unwrap();
        assert!(path.exists());
        assert_eq!(image::image_dimensions(&path).unwrap(), (40, 30));

        let manifest: serde_json::Value =
            serde_json::from_reader(File::open(path.with_extension("json")).unwrap()).unwrap();
        assert_eq!(manifest["page_width_mm"], 297.0);
        assert_eq!(manifest["pixel_height"], 30);
    }

    #[test]
    fn unwritable_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let encoder = JpegDocumentEncoder::new(blocker.join("sub"));
        assert!(encoder.encode(&RgbImage::new(4, 4), PageSize::new(10.0, 10.0)).is_err());
    }
}
