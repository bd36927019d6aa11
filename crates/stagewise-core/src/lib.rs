//! Core types and the promotion state machine for Stagewise.
//!
//! This crate has no HTTP or database dependencies.
//! Registry backends implement [`registry::ModelRegistry`]; the deployment
//! and retraining workflows only ever talk to that trait.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod backend;
pub mod deploy;
pub mod error;
pub mod forest;
pub mod gate;
pub mod memory;
pub mod notify;
pub mod predict;
pub mod registry;
pub mod retrain;
pub mod settings;
pub mod stage;
pub mod timed;
pub mod train;
pub mod transition;
pub mod version;

pub use error::{DeployError, RegistryError, RetrainError, TransitionError};
pub use stage::Stage;

#[cfg(test)]
mod testing;
