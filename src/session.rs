use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::clustering::{cluster, Cluster};
use crate::error::{ExportError, RowError};
use crate::export::plan::{ExportPlan, PageSize};
use crate::export::render::RenderRequest;
use crate::markers::MarkerStore;
use crate::projection::{MapView, PixelSize};
use crate::symbols::{resolve, IconDef, SymbolSet, SymbolSpec};

/// View, symbol and distance parameters that an export scales and later restores
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewSnapshot {
    pub pixel_size: PixelSize,
    pub resolution: f64,
    pub radius_px: f64,
    pub distance_px: f64,
}

/// Everything the map currently shows.
#[derive(Debug, Clone)]
pub struct MapState {
    pub view: MapView,
    pub radius_px: f64,
    pub distance_px: f64,
    icons: Vec<IconDef>,
    store: MarkerStore,
    symbols: Arc<SymbolSet>,
    clusters: Arc<Vec<Cluster>>,
    exporting: bool,
}

impl MapState {
    pub fn new(view: MapView, radius_px: f64, distance_px: f64, icons: Vec<IconDef>) -> Self {
        let symbols = SymbolSet::shared(&icons, radius_px);
        Self {
            view,
            radius_px,
            distance_px,
            icons,
            store: MarkerStore::new(),
            symbols,
            clusters: Arc::new(Vec::new()),
            exporting: false,
        }
    }

    fn rebuild_symbols(&mut self) {
        self.symbols = SymbolSet::shared(&self.icons, self.radius_px);
    }

    fn recluster(&mut self) {
        let projector = self.view.projector();
        self.clusters = Arc::new(cluster(self.store.markers(), self.distance_px, &projector));
    }

    fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            pixel_size: self.view.pixel_size,
            resolution: self.view.resolution,
            radius_px: self.radius_px,
            distance_px: self.distance_px,
        }
    }

    fn apply_snapshot(&mut self, snapshot: &ViewSnapshot) {
        self.view.pixel_size = snapshot.pixel_size;
        self.view.resolution = snapshot.resolution;
        self.radius_px = snapshot.radius_px;
        self.distance_px = snapshot.distance_px;
        self.rebuild_symbols();
        self.recluster();
    }
}

/// One cluster ready for display: where it sits and how it looks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterView {
    pub x: f64,
    pub y: f64,
    pub label: String,
    pub members: usize,
    pub symbol: SymbolSpec,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub accepted: usize,
    pub skipped: Vec<RowError>,
    pub clusters: usize,
}

/// Shared handle over the map state
#[derive(Clone)]
pub struct MapSession {
    state: Arc<RwLock<MapState>>,
}

impl MapSession {
    pub fn new(state: MapState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MapState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MapState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the map for editing. Fails while an export holds the view.
    pub fn edit(&self) -> Result<MapEditor<'_>, ExportError> {
        let state = self.write();
        if state.exporting {
            return Err(ExportError::ExportInProgress);
        }
        Ok(MapEditor { state })
    }

    /// Replaces all markers from tabular text and reclusters
    pub fn load_markers(&self, text: &str) -> Result<LoadSummary, ExportError> {
        Ok(self.edit()?.load_markers(text))
    }

    pub fn set_radius(&self, radius_px: f64) -> Result<()> {
        self.edit()?.set_radius(radius_px)
    }

    pub fn set_distance(&self, distance_px: f64) -> Result<()> {
        self.edit()?.set_distance(distance_px)
    }

    pub fn set_page(&self, page: PageSize) -> Result<(), ExportError> {
        self.edit()?.set_page(page);
        Ok(())
    }

    pub fn set_center(&self, longitude: f64, latitude: f64) -> Result<(), ExportError> {
        self.edit()?.set_center(longitude, latitude);
        Ok(())
    }

    pub fn set_zoom(&self, zoom: f64) -> Result<(), ExportError> {
        self.edit()?.set_zoom(zoom);
        Ok(())
    }

    /// Claims the view for one export. Edits are refused until the lease drops.
    pub fn begin_export(&self) -> Result<ExportLease, ExportError> {
        let mut state = self.write();
        if state.exporting {
            return Err(ExportError::ExportInProgress);
        }
        state.exporting = true;
        Ok(ExportLease { session: self.clone() })
    }

    pub fn is_exporting(&self) -> bool {
        self.read().exporting
    }

    pub fn view(&self) -> MapView {
        self.read().view
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.read().snapshot()
    }

    pub fn symbols(&self) -> Arc<SymbolSet> {
        Arc::clone(&self.read().symbols)
    }

    pub fn clusters(&self) -> Arc<Vec<Cluster>> {
        Arc::clone(&self.read().clusters)
    }

    pub fn render_request(&self, ticket: u64) -> RenderRequest {
        let state = self.read();
        RenderRequest {
            ticket,
            view: state.view,
            clusters: Arc::clone(&state.clusters),
            symbols: Arc::clone(&state.symbols),
        }
    }

    pub fn resolved_clusters(&self) -> Vec<ClusterView> {
        let state = self.read();
        state
            .clusters
            .iter()
            .map(|c| {
                let resolved = resolve(c, &state.symbols);
                ClusterView {
                    x: c.projected_center.0,
                    y: c.projected_center.1,
                    label: resolved.label,
                    members: c.len(),
                    symbol: resolved.spec.clone(),
                }
            })
            .collect()
    }
}

/// Exclusive write access to the map outside of an export
pub struct MapEditor<'a> {
    state: RwLockWriteGuard<'a, MapState>,
}

impl MapEditor<'_> {
    pub fn load_markers(&mut self, text: &str) -> LoadSummary {
        self.state.store.rebuild(text);
        self.state.recluster();
        LoadSummary {
            accepted: self.state.store.len(),
            skipped: self.state.store.skipped().to_vec(),
            clusters: self.state.clusters.len(),
        }
    }

    /// Rebuilds the whole symbol set for the new radius
    pub fn set_radius(&mut self, radius_px: f64) -> Result<()> {
        if !(radius_px.is_finite() && radius_px > 0.0) {
            bail!("radius must be a positive number, got {}", radius_px);
        }
        self.state.radius_px = radius_px;
        self.state.rebuild_symbols();
        self.state.recluster();
        Ok(())
    }

    pub fn set_distance(&mut self, distance_px: f64) -> Result<()> {
        if !(distance_px.is_finite() && distance_px >= 0.0) {
            bail!("distance must be zero or positive, got {}", distance_px);
        }
        self.state.distance_px = distance_px;
        self.state.recluster();
        Ok(())
    }

    /// Resizes the on-screen view to preview the page format
    pub fn set_page(&mut self, page: PageSize) {
        self.state.view.pixel_size = page.screen_size();
        info!(
            "View resized to {}x{} for {}x{}mm page",
            self.state.view.pixel_size.width, self.state.view.pixel_size.height, page.width_mm, page.height_mm
        );
        self.state.recluster();
    }

    pub fn set_center(&mut self, longitude: f64, latitude: f64) {
        self.state.view.center = (longitude, latitude);
        self.state.recluster();
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.state.view.resolution = MapView::resolution_for_zoom(zoom);
        self.state.recluster();
    }
}

/// Held by the running export. Only the lease may scale and restore the view.
pub struct ExportLease {
    session: MapSession,
}

impl ExportLease {
    /// Scales view, symbols and distance for a print pass
    pub fn apply_scale(&self, plan: &ExportPlan) {
        let original = &plan.original;
        let scaled = ViewSnapshot {
            pixel_size: plan.target,
            resolution: original.resolution / plan.scale_factor,
            radius_px: original.radius_px * plan.scale_factor,
            distance_px: original.distance_px * plan.scale_factor,
        };
        debug!("Applying export scale {:?}", scaled);
        self.session.write().apply_snapshot(&scaled);
    }

    /// Puts back the captured values verbatim
    pub fn restore(&self, snapshot: &ViewSnapshot) {
        debug!("Restoring view state {:?}", snapshot);
        self.session.write().apply_snapshot(snapshot);
    }
}

impl Drop for ExportLease {
    fn drop(&mut self) {
        self.session.write().exporting = false;
    }
}
