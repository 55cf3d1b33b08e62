use serde::Serialize;

use crate::constants::{MAX_EXPORT_SIDE_PX, MM_PER_INCH, PAGE_FORMATS, SCREEN_PX_PER_MM};
use crate::error::ExportError;
use crate::projection::PixelSize;
use crate::session::ViewSnapshot;

/// Physical page size in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageSize {
    pub width_mm: f64,
    pub height_mm: f64,
}

impl PageSize {
    pub fn new(width_mm: f64, height_mm: f64) -> Self {
        Self { width_mm, height_mm }
    }

    /// Looks up a named format (a0..a5), landscape orientation
    pub fn from_format(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        PAGE_FORMATS
            .iter()
            .find(|(key, _, _)| *key == name)
            .map(|&(_, w, h)| Self::new(w, h))
    }

    /// Pixel size of the on-screen preview for this page
    pub fn screen_size(&self) -> PixelSize {
        PixelSize::new(
            (self.width_mm * SCREEN_PX_PER_MM).round() as u32,
            (self.height_mm * SCREEN_PX_PER_MM).round() as u32,
        )
    }

    /// Pixel size of this page printed at `ppi` pixels per inch.
    ///
    /// `None` when either side rounds to zero or exceeds `MAX_EXPORT_SIDE_PX`.
    pub fn pixels_at(&self, ppi: f64) -> Option<PixelSize> {
        let side = |mm: f64| {
            let px = (mm * ppi / MM_PER_INCH).round();
            (px >= 1.0 && px <= f64::from(MAX_EXPORT_SIDE_PX)).then_some(px as u32)
        };
        Some(PixelSize::new(side(self.width_mm)?, side(self.height_mm)?))
    }
}

/// Target raster size and the aspect-fit scale from the current view to it.
///
/// The smaller of the two axis ratios is used so the whole view fits on the page.
pub fn compute_scale(page: PageSize, print_resolution: f64, current: PixelSize) -> Result<(PixelSize, f64), ExportError> {
    if current.is_empty() {
        return Err(ExportError::InvalidViewState {
            width: current.width,
            height: current.height,
        });
    }
    if !(print_resolution.is_finite() && print_resolution > 0.0) {
        return Err(ExportError::InvalidResolution(print_resolution));
    }

    let target = page
        .pixels_at(print_resolution)
        .ok_or(ExportError::InvalidResolution(print_resolution))?;
    let scale = f64::min(
        f64::from(target.width) / f64::from(current.width),
        f64::from(target.height) / f64::from(current.height),
    );
    Ok((target, scale))
}

/// Everything one export needs: the page, the scaled raster size and the
/// on-screen values to put back afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportPlan {
    pub page: PageSize,
    pub target: PixelSize,
    pub scale_factor: f64,
    pub original: ViewSnapshot,
}

impl ExportPlan {
    pub fn compute(page: PageSize, print_resolution: f64, original: ViewSnapshot) -> Result<Self, ExportError> {
        let (target, scale_factor) = compute_scale(page, print_resolution, original.pixel_size)?;
        Ok(Self {
            page,
            target,
            scale_factor,
            original,
        })
    }
}
