//! HTTP ingress for job control.
//!
//! POST /jobs               — submit a new repair job
//! GET  /jobs/{id}          — poll the current state of a job
//! GET  /jobs/{id}/steps    — list all pipeline steps with their results
//! GET  /jobs/{id}/report   — structured run summary from the Finalizer

mod dto;
mod routes;

pub use dto::{JobResponse, StepResponse, SubmitJobRequest};
pub use routes::{router, AppState};
