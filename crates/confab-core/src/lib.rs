pub mod config;
pub mod error;
pub mod events;
pub mod persistence;
pub mod types;

pub use config::ConfabConfig;
pub use error::{ConfabError, Result};
pub use events::{ChatEvent, FinishReason, NoticeLevel};
pub use persistence::PersistenceService;
pub use types::*;
