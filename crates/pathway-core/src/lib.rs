//! Core types and evaluation logic for the Pathway rule engine.
//!
//! This crate is deliberately free of database and runtime dependencies.
//! Everything in it is a pure function over plain records except
//! [`engine::Engine`], which drives a [`store::RuleStore`] backend.

// We intentionally use native `async fn` in traits.
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod fact;
pub mod harness;
pub mod lifecycle;
pub mod matcher;
pub mod rule;
pub mod scoring;
pub mod store;

pub use engine::{Engine, EvaluationResult};
pub use error::{Error, Result};
