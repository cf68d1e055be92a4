use everbrowser_core::Orchestrator;
use std::sync::Arc;

/// Application state shared across all API handlers
pub type AppState = Arc<Orchestrator>;
