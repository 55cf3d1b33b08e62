use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use super::encoder::DocumentEncoder;
use super::events::{ExportEvent, ExportPhase};
use super::plan::{ExportPlan, PageSize};
use super::render::{RenderComplete, RenderHandle, RenderSignal, Renderer};
use crate::error::ExportError;
use crate::session::{ExportLease, MapSession, ViewSnapshot};

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub file: PathBuf,
    pub plan: ExportPlan,
}

fn publish(phase: &Mutex<ExportPhase>, events: &broadcast::Sender<ExportEvent>, event: ExportEvent) {
    *phase.lock().unwrap_or_else(PoisonError::into_inner) = event.phase;
    info!("Export {}: {}", event.phase.name(), event.message);
    // No subscribers is fine
    let _ = events.send(event);
}

// Puts the captured view back if the export future is dropped mid-flight.
// The lease is released only after the view is restored.
struct RestoreGuard<'a> {
    lease: ExportLease,
    original: ViewSnapshot,
    phase: &'a Mutex<ExportPhase>,
    events: &'a broadcast::Sender<ExportEvent>,
    armed: bool,
}

impl RestoreGuard<'_> {
    fn restore(mut self) {
        self.armed = false;
        self.lease.restore(&self.original);
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Export abandoned mid-flight, restoring view");
            self.lease.restore(&self.original);
            let mut event = ExportEvent::new(ExportPhase::Failed, "export abandoned, view restored");
            event.error = Some("cancelled".to_string());
            publish(self.phase, self.events, event);
        }
    }
}

/// Runs one scale-render-encode-restore cycle at a time against a map session.
///
/// The view, symbol radius and cluster distance are scaled for the print pass
/// and always put back, whatever the outcome. While it runs the session refuses
/// edits, and a second export is rejected with `ExportInProgress`.
pub struct ExportOrchestrator<R, E> {
    session: MapSession,
    renderer: R,
    encoder: Arc<E>,
    render_timeout: Duration,
    phase: Mutex<ExportPhase>,
    signals: mpsc::UnboundedSender<RenderComplete>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<RenderComplete>>,
    next_ticket: AtomicU64,
    events: broadcast::Sender<ExportEvent>,
}

impl<R: Renderer, E: DocumentEncoder + 'static> ExportOrchestrator<R, E> {
    pub fn new(session: MapSession, renderer: R, encoder: E, render_timeout: Duration) -> Self {
        let (signals, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(100);
        Self {
            session,
            renderer,
            encoder: Arc::new(encoder),
            render_timeout,
            phase: Mutex::new(ExportPhase::Idle),
            signals,
            inbox: tokio::sync::Mutex::new(inbox),
            next_ticket: AtomicU64::new(0),
            events,
        }
    }

    pub fn session(&self) -> &MapSession {
        &self.session
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn phase(&self) -> ExportPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExportEvent> {
        self.events.subscribe()
    }

    fn transition(&self, event: ExportEvent) {
        publish(&self.phase, &self.events, event);
    }

    /// Exports the current map at true print scale for `page` and `print_resolution`.
    pub async fn export(&self, page: PageSize, print_resolution: f64) -> Result<ExportOutcome, ExportError> {
        let mut inbox = self.inbox.try_lock().map_err(|_| {
            warn!("Export requested while another one is running");
            ExportError::ExportInProgress
        })?;

        let lease = self.session.begin_export().map_err(|e| {
            warn!("Export requested while the view is held by another export");
            e
        })?;

        // Nothing is touched until the plan is valid
        let original = self.session.snapshot();
        let plan = ExportPlan::compute(page, print_resolution, original)?;

        self.transition(ExportEvent::new(
            ExportPhase::Preparing,
            format!(
                "{}x{}px at scale {:.4} for {}x{}mm",
                plan.target.width, plan.target.height, plan.scale_factor, page.width_mm, page.height_mm
            ),
        ));
        lease.apply_scale(&plan);
        let guard = RestoreGuard {
            lease,
            original,
            phase: &self.phase,
            events: &self.events,
            armed: true,
        };

        let result = self.render_and_encode(&plan, &mut inbox).await;

        match &result {
            Ok(file) => {
                let mut event = ExportEvent::new(ExportPhase::Restoring, "restoring view");
                event.file = Some(file.display().to_string());
                self.transition(event);
            }
            Err(e) => {
                error!("Export failed: {}", e);
                let mut event = ExportEvent::new(ExportPhase::Failed, "restoring view after failure");
                event.error = Some(e.to_string());
                self.transition(event);
            }
        }
        guard.restore();

        let file = result?;
        self.transition(ExportEvent::new(ExportPhase::Idle, "view restored"));
        Ok(ExportOutcome { file, plan })
    }

    async fn render_and_encode(
        &self,
        plan: &ExportPlan,
        inbox: &mut mpsc::UnboundedReceiver<RenderComplete>,
    ) -> Result<PathBuf, ExportError> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        let request = self.session.render_request(ticket);

        self.transition(ExportEvent::new(
            ExportPhase::Rendering,
            format!("render {} requested ({} clusters)", ticket, request.clusters.len()),
        ));
        self.renderer
            .request_render(request, RenderSignal::new(ticket, self.signals.clone()));

        let image = RenderHandle::new(ticket, inbox, self.render_timeout).wait().await?;

        let encoder = Arc::clone(&self.encoder);
        let page = plan.page;
        tokio::task::spawn_blocking(move || encoder.encode(&image, page))
            .await
            .map_err(|e| ExportError::EncodingFailure(anyhow::anyhow!("encoder task failed: {}", e)))?
            .map_err(ExportError::EncodingFailure)
    }
}
