//! everBrowser core - the streaming session orchestrator
//!
//! Sits between many client requests and one long-running agent:
//! - `session`: per-session history, lock and stop token
//! - `normalizer`: raw agent output to clean visible tokens
//! - `judge`: asks the agent whether the task is done
//! - `orchestrator`: the continuation loop with bounded retries

pub mod config;
pub mod error;
pub mod events;
pub mod judge;
pub mod normalizer;
pub mod orchestrator;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::OrchestratorConfig;
pub use error::{CoreError, Result};
pub use events::{ChannelSink, ChatEvent, EventSink};
pub use judge::{CompletionJudge, TaskStatus, parse_task_status};
pub use normalizer::{Fragment, TokenNormalizer, strip_reasoning};
pub use orchestrator::{AgentSlot, Orchestrator, RequestOutcome};
pub use session::{SessionStore, SessionGuard};
