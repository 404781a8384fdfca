//! Debug Adapter Protocol (DAP) server backed by an Elixir `iex` session.
//!
//! The adapter presents a single-threaded pseudo-debugger over a Mix
//! project's source while routing `evaluate` requests to a live REPL.

pub mod adapter;
pub mod debugger;
pub mod handles;
pub mod server;
pub mod stack;
