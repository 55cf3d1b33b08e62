use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive},
    response::{Json, Sse},
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{error, info, warn};

use super::state::AppState;
use crate::error::ExportError;
use crate::export::PageSize;
use crate::session::{ClusterView, LoadSummary, MapEditor};
use crate::settings::Settings;

/// Partial settings update; absent fields are left alone
#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub radius: Option<f64>,
    pub distance: Option<f64>,
    pub page_format: Option<String>,
    pub print_resolution: Option<f64>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub zoom: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    pub page_format: Option<String>,
    pub print_resolution: Option<f64>,
}

fn error_body(status: StatusCode, kind: &str, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "error": kind,
            "message": message.into(),
        })),
    )
}

pub async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    let settings = state.settings.lock().unwrap_or_else(PoisonError::into_inner);
    Json(settings.clone())
}

// API endpoint to update map parameters
pub async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let mut candidate = state.settings.lock().unwrap_or_else(PoisonError::into_inner).clone();
    if let Some(radius) = update.radius {
        candidate.radius = radius;
    }
    if let Some(distance) = update.distance {
        candidate.distance = distance;
    }
    if let Some(ref page_format) = update.page_format {
        candidate.page_format = page_format.clone();
    }
    if let Some(print_resolution) = update.print_resolution {
        candidate.print_resolution = print_resolution;
    }
    if let Some(longitude) = update.longitude {
        candidate.longitude = longitude;
    }
    if let Some(latitude) = update.latitude {
        candidate.latitude = latitude;
    }
    if let Some(zoom) = update.zoom {
        candidate.zoom = zoom;
    }

    if let Err(e) = candidate.validate() {
        return Err(error_body(StatusCode::BAD_REQUEST, "invalid_settings", e.to_string()));
    }

    // The editor holds the map for the whole update, so it lands before or after an export
    {
        let mut editor = state
            .session
            .edit()
            .map_err(|e| error_body(error_status(&e), e.kind(), e.to_string()))?;
        let apply = |editor: &mut MapEditor<'_>| -> anyhow::Result<()> {
            if update.radius.is_some() {
                editor.set_radius(candidate.radius)?;
            }
            if update.distance.is_some() {
                editor.set_distance(candidate.distance)?;
            }
            if update.page_format.is_some() {
                if let Some(page) = candidate.page() {
                    editor.set_page(page);
                }
            }
            if update.longitude.is_some() || update.latitude.is_some() {
                editor.set_center(candidate.longitude, candidate.latitude);
            }
            if update.zoom.is_some() {
                editor.set_zoom(candidate.zoom);
            }
            Ok(())
        };
        if let Err(e) = apply(&mut editor) {
            return Err(error_body(StatusCode::BAD_REQUEST, "invalid_settings", e.to_string()));
        }
    }

    let mut settings = state.settings.lock().unwrap_or_else(PoisonError::into_inner);
    *settings = candidate;
    if let Err(e) = settings.save() {
        warn!("Failed to save settings: {:#}", e);
    }

    Ok(Json(serde_json::json!({
        "status": "success",
        "settings": *settings,
    })))
}

// API endpoint to replace the marker set from CSV text
pub async fn load_markers(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<LoadSummary>, (StatusCode, Json<serde_json::Value>)> {
    let summary = state.session.load_markers(&body).map_err(|e| {
        warn!("Marker upload refused: {}", e);
        error_body(error_status(&e), e.kind(), e.to_string())
    })?;
    info!(
        "Loaded {} markers ({} skipped) into {} clusters",
        summary.accepted,
        summary.skipped.len(),
        summary.clusters
    );
    Ok(Json(summary))
}

pub async fn get_clusters(State(state): State<AppState>) -> Json<Vec<ClusterView>> {
    Json(state.session.resolved_clusters())
}

fn error_status(err: &ExportError) -> StatusCode {
    match err {
        ExportError::ExportInProgress => StatusCode::CONFLICT,
        ExportError::InvalidViewState { .. }
        | ExportError::UnknownPageFormat(_)
        | ExportError::InvalidResolution(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ExportError::RenderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ExportError::EncodingFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Current export phase; `busy` means edits and new exports are refused
pub async fn export_state(State(state): State<AppState>) -> Json<serde_json::Value> {
    let phase = state.exporter.phase();
    Json(serde_json::json!({
        "phase": phase,
        "busy": !phase.is_settled(),
    }))
}

// API endpoint to export the map at print scale
pub async fn export_map(
    State(state): State<AppState>,
    Json(params): Json<ExportParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let (page_format, print_resolution) = {
        let settings = state.settings.lock().unwrap_or_else(PoisonError::into_inner);
        (
            params.page_format.unwrap_or_else(|| settings.page_format.clone()),
            params.print_resolution.unwrap_or(settings.print_resolution),
        )
    };

    let result = match PageSize::from_format(&page_format) {
        Some(page) => state.exporter.export(page, print_resolution).await,
        None => Err(ExportError::UnknownPageFormat(page_format)),
    };

    match result {
        Ok(outcome) => Ok(Json(serde_json::json!({
            "status": "success",
            "file": outcome.file.display().to_string(),
            "width": outcome.plan.target.width,
            "height": outcome.plan.target.height,
            "scale": outcome.plan.scale_factor,
        }))),
        Err(e) => {
            error!("Export request failed: {}", e);
            Err(error_body(error_status(&e), e.kind(), e.to_string()))
        }
    }
}

// SSE endpoint for export phase updates
pub async fn export_events_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (tx, rx) = mpsc::channel(100);
    let mut event_receiver = state.exporter.subscribe();

    tokio::spawn(async move {
        loop {
            match event_receiver.recv().await {
                Ok(export_event) => {
                    let sse_event = SseEvent::default()
                        .event(export_event.phase.name())
                        .json_data(&export_event)
                        .unwrap_or_else(|_| SseEvent::default().data("Error serializing event"));

                    if tx.send(Ok(sse_event)).await.is_err() {
                        break; // Client disconnected
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("SSE client lagged behind by {} export events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive-message"),
    )
}
