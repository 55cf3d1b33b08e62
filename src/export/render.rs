use image::{Rgb as Pixel, RgbImage};
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clustering::Cluster;
use crate::constants::BACKGROUND_RGB;
use crate::error::ExportError;
use crate::projection::MapView;
use crate::symbols::{resolve, ResolvedSymbol, Shape, SymbolSet, SymbolSpec};

/// What the renderer should draw for one export
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub ticket: u64,
    pub view: MapView,
    pub clusters: Arc<Vec<Cluster>>,
    pub symbols: Arc<SymbolSet>,
}

impl RenderRequest {
    /// Style function handed to the renderer
    pub fn style<'a>(&'a self, cluster: &Cluster) -> ResolvedSymbol<'a> {
        resolve(cluster, &self.symbols)
    }
}

#[derive(Debug)]
pub struct RenderComplete {
    pub ticket: u64,
    pub image: RgbImage,
}

/// Single-use completion signal for one render request.
///
/// `complete` consumes the signal, so a request cannot report twice.
#[derive(Debug)]
pub struct RenderSignal {
    ticket: u64,
    tx: mpsc::UnboundedSender<RenderComplete>,
}

impl RenderSignal {
    pub fn new(ticket: u64, tx: mpsc::UnboundedSender<RenderComplete>) -> Self {
        Self { ticket, tx }
    }

    pub fn complete(self, image: RgbImage) {
        let ticket = self.ticket;
        if self.tx.send(RenderComplete { ticket, image }).is_err() {
            debug!("Render {} finished after the export pipeline shut down", ticket);
        }
    }
}

/// Produces a raster of the current view and reports it through the signal
pub trait Renderer: Send + Sync {
    fn request_render(&self, request: RenderRequest, signal: RenderSignal);
}

/// Waits for the completion of one specific render request
pub struct RenderHandle<'a> {
    ticket: u64,
    inbox: &'a mut mpsc::UnboundedReceiver<RenderComplete>,
    timeout: Duration,
}

impl<'a> RenderHandle<'a> {
    pub fn new(ticket: u64, inbox: &'a mut mpsc::UnboundedReceiver<RenderComplete>, timeout: Duration) -> Self {
        Self { ticket, inbox, timeout }
    }

    /// Resolves with the raster of this ticket. Completions of older tickets
    /// still sitting in the inbox are discarded.
    pub async fn wait(self) -> Result<RgbImage, ExportError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.inbox.recv()).await {
                Ok(Some(done)) if done.ticket == self.ticket => return Ok(done.image),
                Ok(Some(stale)) => {
                    warn!("Ignoring stale render signal {} (waiting for {})", stale.ticket, self.ticket);
                }
                Ok(None) | Err(_) => return Err(ExportError::RenderTimeout(self.timeout)),
            }
        }
    }
}

/// Draws cluster symbols onto a plain background
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterRenderer;

impl Renderer for RasterRenderer {
    fn request_render(&self, request: RenderRequest, signal: RenderSignal) {
        tokio::task::spawn_blocking(move || {
            let image = rasterize(&request);
            debug!(
                "Rendered {} clusters into {}x{} raster",
                request.clusters.len(),
                image.width(),
                image.height()
            );
            signal.complete(image);
        });
    }
}

pub fn rasterize(request: &RenderRequest) -> RgbImage {
    let size = request.view.pixel_size;
    let mut canvas = RgbImage::from_pixel(size.width, size.height, Pixel(BACKGROUND_RGB));

    for cluster in request.clusters.iter() {
        let style = request.style(cluster);
        draw_symbol(&mut canvas, cluster.projected_center, style.spec);
    }
    canvas
}

fn draw_symbol(canvas: &mut RgbImage, center: (f64, f64), spec: &SymbolSpec) {
    let radius = spec.radius_px;
    let stroke_width = (radius / 8.0).max(1.0);

    // Outline first at full size, then the fill inset by the stroke width
    fill_shape(canvas, center, spec.shape, radius, Pixel(spec.stroke_color.0));
    if radius > stroke_width {
        fill_shape(canvas, center, spec.shape, radius - stroke_width, Pixel(spec.fill_color.0));
    }
}

fn fill_shape(canvas: &mut RgbImage, center: (f64, f64), shape: Shape, radius: f64, color: Pixel<u8>) {
    let (w, h) = (canvas.width() as i64, canvas.height() as i64);
    let x0 = ((center.0 - radius).floor() as i64).max(0);
    let x1 = ((center.0 + radius).ceil() as i64).min(w - 1);
    let y0 = ((center.1 - radius).floor() as i64).max(0);
    let y1 = ((center.1 + radius).ceil() as i64).min(h - 1);
    if x0 > x1 || y0 > y1 {
        return;
    }

    let polygon = shape_vertices(center, shape, radius);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = (x as f64 + 0.5, y as f64 + 0.5);
            let inside = match &polygon {
                None => {
                    let (dx, dy) = (p.0 - center.0, p.1 - center.1);
                    dx * dx + dy * dy <= radius * radius
                }
                Some(vertices) => point_in_polygon(p, vertices),
            };
            if inside {
                canvas.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

// Screen-space vertices; angle 0 points straight up
fn shape_vertices(center: (f64, f64), shape: Shape, radius: f64) -> Option<Vec<(f64, f64)>> {
    let points = shape.points()?;
    let vertex = |theta: f64, r: f64| (center.0 + r * theta.sin(), center.1 - r * theta.cos());

    let vertices = if shape == Shape::Star {
        (0..points * 2)
            .map(|i| {
                let r = if i % 2 == 0 { radius } else { radius / 2.0 };
                vertex(shape.angle() + PI * f64::from(i) / f64::from(points), r)
            })
            .collect()
    } else {
        (0..points)
            .map(|i| vertex(shape.angle() + 2.0 * PI * f64::from(i) / f64::from(points), radius))
            .collect()
    };
    Some(vertices)
}

fn point_in_polygon(p: (f64, f64), vertices: &[(f64, f64)]) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[j];
        if (yi > p.1) != (yj > p.1) && p.0 < (xj - xi) * (p.1 - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}
