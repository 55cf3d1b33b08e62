//! Marker clustering and true-to-scale print export for interactive maps.
//!
//! Markers are grouped by on-screen distance and drawn with one symbol per
//! group. An export scales the view and the symbols to the requested page
//! and print resolution, renders, encodes, and then restores the screen.

pub mod clustering;
pub mod constants;
pub mod error;
pub mod export;
pub mod markers;
pub mod projection;
pub mod server;
pub mod session;
pub mod settings;
pub mod symbols;

pub use clustering::{cluster, Cluster};
pub use error::{ExportError, RowError};
pub use markers::{Marker, MarkerStore};
pub use projection::{MapView, PixelSize, Projector, ViewProjector, WebMercator};
pub use session::{ExportLease, MapEditor, MapSession, MapState, ViewSnapshot};
pub use symbols::{resolve, IconDef, Shape, SymbolSet, SymbolSpec};
