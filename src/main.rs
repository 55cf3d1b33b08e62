use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mapprint::export::{ExportOrchestrator, JpegDocumentEncoder, RasterRenderer};
use mapprint::server::{start_server, AppState};
use mapprint::settings::Settings;
use mapprint::symbols::default_icons;
use mapprint::{MapSession, MapState, MapView};

fn build_session(settings: &Settings) -> Result<MapSession> {
    let page = settings
        .page()
        .with_context(|| format!("Unknown page format '{}'", settings.page_format))?;
    let view = MapView::new(
        page.screen_size(),
        (settings.longitude, settings.latitude),
        settings.zoom,
    );
    let session = MapSession::new(MapState::new(view, settings.radius, settings.distance, default_icons()));

    if let Some(ref markers_file) = settings.markers_file {
        match std::fs::read_to_string(markers_file) {
            Ok(text) => {
                let summary = session.load_markers(&text)?;
                info!(
                    "Loaded {} markers from {} ({} rows skipped)",
                    summary.accepted,
                    markers_file,
                    summary.skipped.len()
                );
            }
            Err(e) => warn!("Could not read markers file {}: {}", markers_file, e),
        }
    }
    Ok(session)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mapprint=info")))
        .with_target(false)
        .compact()
        .init();

    info!("MapPrint v{} starting", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load().context("Failed to load settings")?;
    settings.validate().context("Invalid settings")?;
    info!("Using config {}", Settings::config_path().display());

    let session = build_session(&settings)?;
    info!("{} marker types configured", session.symbols().type_count());

    let encoder = JpegDocumentEncoder::new(&settings.output_dir);
    info!("Exports are written to {}", encoder.output_dir().display());
    let exporter = Arc::new(ExportOrchestrator::new(
        session.clone(),
        RasterRenderer,
        encoder,
        settings.render_timeout(),
    ));

    // One-shot export without the HTTP server
    if std::env::args().any(|arg| arg == "--export") {
        let page = settings
            .page()
            .with_context(|| format!("Unknown page format '{}'", settings.page_format))?;
        let outcome = exporter.export(page, settings.print_resolution).await?;
        info!("Map written to {}", outcome.file.display());
        return Ok(());
    }

    let port = settings.port;
    let app_state = AppState {
        session,
        exporter,
        settings: Arc::new(Mutex::new(settings)),
    };

    start_server(app_state, port).await
}
