//! # Codemend Core
//!
//! Core abstractions for the codemend control plane.
//!
//! This crate contains:
//! - Job / Step / AgentRole / Message definitions and the pipeline ordering
//! - The `ControlStore` trait the durable store implementations fulfil
//!
//! This crate does NOT care about:
//! - How rows are persisted (see codemend-stores)
//! - How agents are driven (see codemend-engine)
//! - How requests arrive (see codemend-api)

pub mod store;
pub mod types;

pub use store::{ControlStore, StepTransition, StoreError};
pub use types::{AgentRole, Job, JobState, Message, Step, StepState, PIPELINE};
