pub mod encoder;
pub mod events;
pub mod orchestrator;
pub mod plan;
pub mod render;

pub use encoder::{DocumentEncoder, JpegDocumentEncoder};
pub use events::{ExportEvent, ExportPhase};
pub use orchestrator::{ExportOrchestrator, ExportOutcome};
pub use plan::{compute_scale, ExportPlan, PageSize};
pub use render::{RasterRenderer, RenderComplete, RenderHandle, RenderRequest, RenderSignal, Renderer};
