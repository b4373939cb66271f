use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::llm_client::Capability;

/// Cancellation tokens for in-flight screening runs, keyed by run id.
pub type ActiveRuns = Arc<RwLock<HashMap<Uuid, CancellationToken>>>;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// The model capability boundary. Production: `LlmClient`. Tests swap in
    /// scripted fakes.
    pub capability: Arc<dyn Capability>,
    pub config: Config,
    /// Inserted when a run starts, removed when its `ActiveRunGuard` drops.
    pub active_runs: ActiveRuns,
}

/// Registry entry for one in-flight run. Removal happens on drop, so the
/// entry is cleaned up however the owning request future ends — including
/// axum dropping it on client disconnect mid-run.
pub struct ActiveRunGuard {
    runs: ActiveRuns,
    run_id: Uuid,
}

impl ActiveRunGuard {
    pub async fn register(runs: ActiveRuns, run_id: Uuid, token: CancellationToken) -> Self {
        runs.write().await.insert(run_id, token);
        Self { runs, run_id }
    }
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        // Drop is sync; hand the async map removal to the runtime.
        let runs = Arc::clone(&self.runs);
        let run_id = self.run_id;
        tokio::spawn(async move {
            runs.write().await.remove(&run_id);
        });
    }
}
