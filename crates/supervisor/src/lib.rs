//! Lifecycle supervision for external TTS server processes.
//!
//! [`ModelRegistry`] owns the model catalog and keeps at most one backend
//! loaded; [`ProcessHandle`] spawns, health-checks, stops and forwards
//! synthesis calls to a single backend process.

pub mod config;
pub mod discovery;
pub mod error;
pub mod port;
pub mod process;
pub mod registry;
pub mod schema;

pub use config::{BackendEnv, Timings};
pub use error::{Result, SupervisorError};
pub use process::ProcessHandle;
pub use registry::ModelRegistry;
pub use schema::*;
