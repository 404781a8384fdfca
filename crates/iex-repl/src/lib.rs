//! iex REPL interaction engine.
//!
//! Spawns and owns an `iex -S mix` process, frames its unstructured console
//! output into discrete replies via prompt detection, and correlates each
//! outbound command with exactly one pending caller.

pub mod engine;
pub mod error;
pub mod manifest;
pub mod process;
pub mod prompt;

pub use engine::{BootstrapPhase, BootstrapScript, ReplEngine};
pub use error::{Error, Result};
pub use process::{IexSpawner, ReplConnection, ReplSpawner, ReplTransport};
pub use prompt::{OutputFramer, PromptKind, Reply};
