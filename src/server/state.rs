use std::sync::{Arc, Mutex};

use crate::export::{ExportOrchestrator, JpegDocumentEncoder, RasterRenderer};
use crate::session::MapSession;
use crate::settings::Settings;

pub type MapExporter = ExportOrchestrator<RasterRenderer, JpegDocumentEncoder>;

// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub session: MapSession,
    pub exporter: Arc<MapExporter>,
    pub settings: Arc<Mutex<Settings>>,
}
