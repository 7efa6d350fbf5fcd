pub mod bridge;
pub mod coordinator;
pub mod orchestrator;
pub mod session;
pub mod traits;

pub use orchestrator::{OrchestratorSettings, SessionError, SessionOrchestrator};
pub use session::{EndReason, SessionReport};
