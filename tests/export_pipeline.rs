use anyhow::{anyhow, Result};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mapprint::export::{
    DocumentEncoder, ExportOrchestrator, ExportPhase, JpegDocumentEncoder, PageSize, RasterRenderer,
    RenderRequest, RenderSignal, Renderer,
};
use mapprint::symbols::default_icons;
use mapprint::{resolve, ExportError, MapSession, MapState, MapView, PixelSize, ViewSnapshot};

const MARKERS: &str = "longitude,latitude,type\n0,0,A\n0,0,A\n0,0.001,B\n30,20,C\n";

fn session_with_view(width: u32, height: u32) -> MapSession {
    let view = MapView::new(PixelSize::new(width, height), (0.0, 0.0), 3.0);
    let session = MapSession::new(MapState::new(view, 10.0, 40.0, default_icons()));
    session.load_markers(MARKERS).unwrap();
    session
}

fn portrait_a4() -> PageSize {
    PageSize::new(210.0, 297.0)
}

#[derive(Debug, Clone)]
struct SeenRequest {
    pixel_size: PixelSize,
    radius_px: f64,
    labels: Vec<String>,
}

/// Completes every request right away with a blank raster of the view size
#[derive(Default)]
struct ImmediateRenderer {
    seen: Mutex<Vec<SeenRequest>>,
}

impl Renderer for ImmediateRenderer {
    fn request_render(&self, request: RenderRequest, signal: RenderSignal) {
        let labels = request.clusters.iter().map(|c| request.style(c).label).collect();
        self.seen.lock().unwrap().push(SeenRequest {
            pixel_size: request.view.pixel_size,
            radius_px: request.symbols.radius_px(),
            labels,
        });
        let size = request.view.pixel_size;
        signal.complete(RgbImage::new(size.width, size.height));
    }
}

/// Drops every signal, so no render ever completes
struct SilentRenderer;

impl Renderer for SilentRenderer {
    fn request_render(&self, _request: RenderRequest, _signal: RenderSignal) {}
}

/// Completes after a delay on a spawned task
struct SlowRenderer(Duration);

impl Renderer for SlowRenderer {
    fn request_render(&self, request: RenderRequest, signal: RenderSignal) {
        let delay = self.0;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let size = request.view.pixel_size;
            signal.complete(RgbImage::new(size.width, size.height));
        });
    }
}

/// Holds on to signals; answers late ones on the next request
#[derive(Default)]
struct LateRenderer {
    respond: AtomicBool,
    held: Mutex<Vec<RenderSignal>>,
}

impl Renderer for LateRenderer {
    fn request_render(&self, request: RenderRequest, signal: RenderSignal) {
        for stale in self.held.lock().unwrap().drain(..) {
            stale.complete(RgbImage::new(1, 1));
        }
        if self.respond.load(Ordering::SeqCst) {
            let size = request.view.pixel_size;
            signal.complete(RgbImage::new(size.width, size.height));
        } else {
            self.held.lock().unwrap().push(signal);
        }
    }
}

#[derive(Default)]
struct RecordingEncoder {
    images: Mutex<Vec<(u32, u32)>>,
}

impl DocumentEncoder for RecordingEncoder {
    fn encode(&self, image: &RgbImage, _page: PageSize) -> Result<PathBuf> {
        self.images.lock().unwrap().push(image.dimensions());
        Ok(PathBuf::from("map.jpg"))
    }
}

struct FailingEncoder;

impl DocumentEncoder for FailingEncoder {
    fn encode(&self, _image: &RgbImage, _page: PageSize) -> Result<PathBuf> {
        Err(anyhow!("disk full"))
    }
}

fn assert_bitwise_equal(a: &ViewSnapshot, b: &ViewSnapshot) {
    assert_eq!(a.pixel_size, b.pixel_size);
    assert_eq!(a.resolution.to_bits(), b.resolution.to_bits());
    assert_eq!(a.radius_px.to_bits(), b.radius_px.to_bits());
    assert_eq!(a.distance_px.to_bits(), b.distance_px.to_bits());
}

#[tokio::test]
async fn successful_export_scales_then_restores() {
    let session = session_with_view(800, 600);
    let before = session.snapshot();
    let clusters_before = session.resolved_clusters();

    let exporter = ExportOrchestrator::new(
        session.clone(),
        ImmediateRenderer::default(),
        RecordingEncoder::default(),
        Duration::from_secs(5),
    );
    let outcome = exporter.export(portrait_a4(), 96.0).await.unwrap();

    assert_eq!(outcome.file, PathBuf::from("map.jpg"));
    assert_eq!(outcome.plan.target, PixelSize::new(794, 1123));
    assert!((outcome.plan.scale_factor - 0.9925).abs() < 1e-12);

    let seen = exporter.renderer().seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].pixel_size, PixelSize::new(794, 1123));
    assert!((seen[0].radius_px - 10.0 * 0.9925).abs() < 1e-12);
    assert_eq!(seen[0].labels, vec!["3".to_string(), "1".to_string()]);

    assert_bitwise_equal(&session.snapshot(), &before);
    assert_eq!(session.resolved_clusters(), clusters_before);
    assert_eq!(exporter.phase(), ExportPhase::Idle);
}

#[tokio::test]
async fn encoder_failure_still_restores() {
    let session = session_with_view(800, 600);
    let before = session.snapshot();

    let exporter = ExportOrchestrator::new(
        session.clone(),
        ImmediateRenderer::default(),
        FailingEncoder,
        Duration::from_secs(5),
    );
    let err = exporter.export(portrait_a4(), 300.0).await.unwrap_err();

    assert!(matches!(err, ExportError::EncodingFailure(_)));
    assert!(err.to_string().contains("disk full"));
    assert_bitwise_equal(&session.snapshot(), &before);
    assert_eq!(exporter.phase(), ExportPhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn render_timeout_still_restores() {
    let session = session_with_view(800, 600);
    let before = session.snapshot();

    let exporter = ExportOrchestrator::new(
        session.clone(),
        SilentRenderer,
        RecordingEncoder::default(),
        Duration::from_secs(30),
    );
    let err = exporter.export(portrait_a4(), 150.0).await.unwrap_err();

    assert!(matches!(err, ExportError::RenderTimeout(d) if d == Duration::from_secs(30)));
    assert_bitwise_equal(&session.snapshot(), &before);
    assert_eq!(exporter.phase(), ExportPhase::Failed);
}

#[tokio::test]
async fn zero_sized_view_is_rejected_before_any_change() {
    let session = session_with_view(0, 600);
    let before = session.snapshot();

    let exporter = ExportOrchestrator::new(
        session.clone(),
        ImmediateRenderer::default(),
        RecordingEncoder::default(),
        Duration::from_secs(5),
    );
    let mut events = exporter.subscribe();
    let err = exporter.export(portrait_a4(), 96.0).await.unwrap_err();

    assert!(matches!(err, ExportError::InvalidViewState { width: 0, height: 600 }));
    assert!(exporter.renderer().seen.lock().unwrap().is_empty());
    assert_eq!(exporter.phase(), ExportPhase::Idle);
    assert_bitwise_equal(&session.snapshot(), &before);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn second_export_is_rejected_while_first_runs() {
    let session = session_with_view(800, 600);
    let exporter = ExportOrchestrator::new(
        session.clone(),
        SlowRenderer(Duration::from_secs(2)),
        RecordingEncoder::default(),
        Duration::from_secs(10),
    );

    let (first, second) = tokio::join!(
        exporter.export(portrait_a4(), 96.0),
        exporter.export(portrait_a4(), 96.0)
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(ExportError::ExportInProgress)));

    // Once the first one is done the next export goes through
    assert!(exporter.export(portrait_a4(), 96.0).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn edits_during_an_export_are_refused() {
    let session = session_with_view(800, 600);
    let before = session.snapshot();
    let exporter = ExportOrchestrator::new(
        session.clone(),
        SlowRenderer(Duration::from_secs(2)),
        RecordingEncoder::default(),
        Duration::from_secs(10),
    );

    let editing = session.clone();
    let (outcome, (during, edit)) = tokio::join!(exporter.export(portrait_a4(), 96.0), async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let during = editing.snapshot();
        (during, editing.set_radius(20.0))
    });

    assert!(outcome.is_ok());
    assert_eq!(during.pixel_size, PixelSize::new(794, 1123));
    let err = edit.unwrap_err();
    assert!(matches!(err.downcast_ref::<ExportError>(), Some(ExportError::ExportInProgress)));
    assert_bitwise_equal(&session.snapshot(), &before);

    // The view is editable again once the export is over
    session.set_radius(20.0).unwrap();
    assert_eq!(session.snapshot().radius_px, 20.0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_export_restores_view() {
    let session = session_with_view(800, 600);
    let before = session.snapshot();
    let exporter = ExportOrchestrator::new(
        session.clone(),
        SilentRenderer,
        RecordingEncoder::default(),
        Duration::from_secs(30),
    );
    let mut events = exporter.subscribe();

    let cancelled = tokio::time::timeout(Duration::from_secs(1), exporter.export(portrait_a4(), 96.0)).await;
    assert!(cancelled.is_err());

    assert_bitwise_equal(&session.snapshot(), &before);
    assert!(!session.is_exporting());
    assert_eq!(exporter.phase(), ExportPhase::Failed);

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        phases.push(event.phase);
    }
    assert_eq!(
        phases,
        vec![ExportPhase::Preparing, ExportPhase::Rendering, ExportPhase::Failed]
    );
    session.set_zoom(4.0).unwrap();
}

#[tokio::test]
async fn oversized_print_resolution_is_rejected_before_any_change() {
    let session = session_with_view(800, 600);
    let before = session.snapshot();
    let exporter = ExportOrchestrator::new(
        session.clone(),
        ImmediateRenderer::default(),
        RecordingEncoder::default(),
        Duration::from_secs(5),
    );

    let err = exporter.export(PageSize::new(1189.0, 841.0), 1e12).await.unwrap_err();
    assert!(matches!(err, ExportError::InvalidResolution(_)));
    assert!(exporter.renderer().seen.lock().unwrap().is_empty());
    assert_bitwise_equal(&session.snapshot(), &before);
    assert!(!session.is_exporting());
}

#[tokio::test(start_paused = true)]
async fn late_signal_from_previous_export_is_ignored() {
    let session = session_with_view(800, 600);
    let exporter = ExportOrchestrator::new(
        session.clone(),
        LateRenderer::default(),
        RecordingEncoder::default(),
        Duration::from_secs(3),
    );

    let err = exporter.export(portrait_a4(), 96.0).await.unwrap_err();
    assert!(matches!(err, ExportError::RenderTimeout(_)));

    exporter.renderer().respond.store(true, Ordering::SeqCst);
    exporter.export(portrait_a4(), 96.0).await.unwrap();

    // Only the raster of the second request reached the encoder
    assert_eq!(*exporter.encoder().images.lock().unwrap(), vec![(794, 1123)]);
}

#[tokio::test]
async fn phases_are_published_in_order() {
    let session = session_with_view(800, 600);
    let exporter = ExportOrchestrator::new(
        session,
        ImmediateRenderer::default(),
        RecordingEncoder::default(),
        Duration::from_secs(5),
    );
    let mut events = exporter.subscribe();
    exporter.export(portrait_a4(), 96.0).await.unwrap();

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        phases.push(event.phase);
    }
    assert_eq!(
        phases,
        vec![
            ExportPhase::Preparing,
            ExportPhase::Rendering,
            ExportPhase::Restoring,
            ExportPhase::Idle
        ]
    );
}

#[tokio::test]
async fn raster_renderer_and_jpeg_encoder_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_with_view(594, 420);
    let before = session.snapshot();

    let exporter = ExportOrchestrator::new(
        session.clone(),
        RasterRenderer,
        JpegDocumentEncoder::new(dir.path()),
        Duration::from_secs(30),
    );
    let outcome = exporter.export(PageSize::new(297.0, 210.0), 72.0).await.unwrap();

    assert!(outcome.file.starts_with(dir.path()));
    assert_eq!(image::image_dimensions(&outcome.file).unwrap(), (842, 595));
    assert_bitwise_equal(&session.snapshot(), &before);
}

#[test]
fn mixed_cluster_round_trip() {
    let view = MapView::new(PixelSize::new(800, 600), (0.0, 0.0), 2.0);
    let session = MapSession::new(MapState::new(view, 10.0, 500.0, default_icons()));
    session.load_markers("longitude,latitude,type\n0,0,A\n0,0,A\n0,0.001,B\n").unwrap();

    let clusters = session.clusters();
    assert_eq!(clusters.len(), 1);

    let symbols = session.symbols();
    let resolved = resolve(&clusters[0], &symbols);
    assert_eq!(resolved.label, "3");
    assert_eq!(resolved.spec, symbols.overflow());
}

#[test]
fn shared_exporter_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Arc<ExportOrchestrator<RasterRenderer, JpegDocumentEncoder>>>();
}
