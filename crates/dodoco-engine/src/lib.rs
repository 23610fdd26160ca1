//! Container engine access for Dodoco.
//!
//! [`client::EngineClient`] is the seam the orchestrator depends on. Two
//! implementations ship with the crate: [`docker::DockerClient`], which talks
//! to a Docker daemon over its HTTP API, and [`memory::MemoryEngine`], an
//! in-process engine used for tests and dry runs.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod archive;
pub mod client;
pub mod docker;
pub mod exec;
pub mod memory;
