//! Reconciliation of managed resources against their backends
//!
//! This module contains the per-event business logic:
//! - Resolving selector parents into external ids
//! - Creating, updating and deleting backend entities idempotently
//! - Polling long-running backend operations
//! - Writing ids, owner references and status back onto the resource

mod dependencies;
pub mod ownership;
mod poller;
mod reconciler;
pub mod status;

pub use dependencies::DependencyResolver;
pub use poller::{poll_until, PollState};
pub use reconciler::{Outcome, Reconciler};
