//! Cosmo Tech Kubernetes Operator
//!
//! This operator reconciles Cosmo Tech custom resources (organizations,
//! solutions, workspaces, runners, runs, ADX databases, Event Hub namespaces
//! and Power BI reports) against the platform API, Azure Resource Manager
//! and the Power BI REST API.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod resource;

pub use error::{Error, Result};
