//! 核心编排层：错误与恢复、编排状态、会话存储、编排器

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_store;
pub mod state;

pub use error::{AgentError, StepError, StepErrorKind};
pub use orchestrator::{create_llm_from_config, Orchestrator};
pub use recovery::RecoveryEngine;
pub use session_store::{MemorySessionStore, SessionStore};
pub use state::{OrchestrationState, SessionStatus};
