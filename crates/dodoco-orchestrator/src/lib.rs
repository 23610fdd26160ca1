//! # dodoco-orchestrator
//!
//! Keeps each persisted container record in sync with its backing engine
//! instance.
//!
//! - [`Orchestrator`](orchestrator::Orchestrator): lifecycle operations,
//!   commits, port changes, destruction, and drift reconciliation.
//! - [`PortAllocator`](ports::PortAllocator): collision-free host ports.
//! - [`ImagePolicy`](image::ImagePolicy): image allow-list and tag
//!   normalization.
//! - [`ProjectQuotaGuard`](quota::ProjectQuotaGuard): approval, membership,
//!   and container-limit checks.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod image;
pub mod locks;
pub mod orchestrator;
pub mod ports;
pub mod quota;
pub mod view;

pub use orchestrator::{CreateRequest, DestroyOutcome, Orchestrator};
