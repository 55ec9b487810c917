pub mod config;
pub mod error;
pub mod event;
pub mod failure;
pub mod prompts;
pub mod traits;
pub mod types;

pub use config::{AppConfig, ConfigOverlay, RunConfig};
pub use error::{Result, ResumindError};
pub use event::{EventBus, FlowEvent};
pub use failure::{Failure, FailureKind, IndexCause, ModelCause};
pub use traits::CapabilityResult;
pub use types::*;
