//! Relational store for Dodoco.
//!
//! A single SQLite connection guarded by a mutex. Callers run closures
//! against a [`Session`](session::Session) either outside a transaction
//! ([`Store::read`](session::Store::read)) or inside an `IMMEDIATE`
//! transaction that commits on `Ok` and rolls back on `Err`
//! ([`Store::write`](session::Store::write)).

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod containers;
pub mod models;
pub mod ports;
pub mod projects;
pub mod schema;
pub mod session;

pub use session::{Session, Store};
