//! Core types and trait definitions for the Assay maturity assessment engine.
//!
//! This crate is deliberately free of HTTP and database dependencies. It holds
//! the domain model, the pure scoring and lifecycle rules, and the traits the
//! engine uses to talk to its collaborators (persistence, artifact storage and
//! the AI analysis capability).

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod actor;
pub mod analysis;
pub mod assessment;
pub mod audit;
pub mod blob;
pub mod criterion;
pub mod error;
pub mod evidence;
pub mod link;
pub mod question;
pub mod store;
pub mod taxonomy;

pub use actor::Actor;
pub use error::{Error, Result};
