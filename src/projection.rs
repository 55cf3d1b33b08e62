use serde::{Deserialize, Serialize};

use crate::constants::{EARTH_RADIUS_M, MAX_MERCATOR_LATITUDE, ZOOM_ZERO_RESOLUTION};

/// Geographic to planar transform. Must be a pure function of its input.
pub trait Projector {
    fn project(&self, lon: f64, lat: f64) -> (f64, f64);
}

/// Spherical web mercator (EPSG:3857), output in metres
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercator;

impl Projector for WebMercator {
    fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        let lat = lat.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
        let x = EARTH_RADIUS_M * lon.to_radians();
        let y = EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
        (x, y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What the map currently shows: viewport size, center and metres per pixel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    pub pixel_size: PixelSize,
    pub center: (f64, f64),
    pub resolution: f64,
}

impl MapView {
    pub fn new(pixel_size: PixelSize, center: (f64, f64), zoom: f64) -> Self {
        Self {
            pixel_size,
            center,
            resolution: Self::resolution_for_zoom(zoom),
        }
    }

    pub fn resolution_for_zoom(zoom: f64) -> f64 {
        ZOOM_ZERO_RESOLUTION / 2f64.powf(zoom)
    }

    pub fn projector(&self) -> ViewProjector {
        ViewProjector::new(self)
    }
}

/// Projects into viewport pixels: origin top-left, y growing downwards.
/// Distances between projected points are on-screen pixel distances.
#[derive(Debug, Clone, Copy)]
pub struct ViewProjector {
    origin: (f64, f64),
    resolution: f64,
    half_size: (f64, f64),
}

impl ViewProjector {
    pub fn new(view: &MapView) -> Self {
        Self {
            origin: WebMercator.project(view.center.0, view.center.1),
            resolution: view.resolution,
            half_size: (
                f64::from(view.pixel_size.width) / 2.0,
                f64::from(view.pixel_size.height) / 2.0,
            ),
        }
    }
}

impl Projector for ViewProjector {
    fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (x, y) = WebMercator.project(lon, lat);
        (
            (x - self.origin.0) / self.resolution + self.half_size.0,
            (self.origin.1 - y) / self.resolution + self.half_size.1,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mercator_origin_and_edges() {
        let (x, y) = WebMercator.project(0.0, 0.0);
        assert!(x.abs() < 1e-9 && y.abs() < 1e-9);

        let (x, _) = WebMercator.project(180.0, 0.0);
        assert!((x - 20_037_508.342_789_244).abs() < 1e-3);

        // Poles are clamped instead of going to infinity
        let (_, y) = WebMercator.project(0.0, 90.0);
        assert!(y.is_finite());
    }

    #[test]
    fn view_center_lands_mid_viewport() {
        let view = MapView::new(PixelSize::new(800, 600), (10.0, 45.0), 4.0);
        let (px, py) = view.projector().project(10.0, 45.0);
        assert!((px - 400.0).abs() < 1e-6);
        assert!((py - 300.0).abs() < 1e-6);
    }

    #[test]
    fn north_is_up() {
        let view = MapView::new(PixelSize::new(100, 100), (0.0, 0.0), 2.0);
        let (_, south) = view.projector().project(0.0, -10.0);
        let (_, north) = view.projector().project(0.0, 10.0);
        assert!(north < south);
    }

    #[test]
    fn zoom_halves_resolution() {
        let r1 = MapView::resolution_for_zoom(1.0);
        let r2 = MapView::resolution_for_zoom(2.0);
        assert!((r1 / r2 - 2.0).abs() < 1e-12);
    }
}
