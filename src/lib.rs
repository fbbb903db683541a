//! Scenario orchestration core for a multi-step API load-testing
//! tool.
//!
//! Sequences independent load-test steps into a scenario, threads
//! response data from earlier steps into later ones via `{{...}}`
//! variable substitution, scores pass/fail assertions against each
//! step's aggregate result, and streams batched live progress to an
//! observer while staying safely cancellable when a new run
//! supersedes an old one.
//!
//! The load-generation engine itself is a collaborator behind the
//! [`engine::LoadEngine`] trait; this crate owns the orchestration,
//! templating, assertion, and progress-batching logic around it.

pub mod assertion;
pub mod engine;
pub mod model;
pub mod progress;
pub mod resolver;
pub mod runner;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::*;
pub use model::*;
pub use runner::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
