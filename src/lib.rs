//! Mirror a local directory tree into a remote filesystem that is only
//! reachable through a command execution channel (`kubectl exec`, `ssh`).
//!
//! Pipeline: [`watcher`] -> [`debounce`] -> [`engine`], with [`bulk`]
//! pushing the whole tree once at startup.

pub mod bulk;
pub mod cli;
pub mod config;
pub mod debounce;
pub mod encode;
pub mod engine;
pub mod error;
pub mod event;
pub mod path;
pub mod provision;
pub mod session;
pub mod transport;
pub mod watcher;

pub use config::{Config, TargetConfig};
pub use engine::{EngineStats, SyncContext, SyncEngine};
pub use error::{Result, SyncError};
pub use session::SessionReport;
