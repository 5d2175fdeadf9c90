//! # Codemend Engine
//!
//! The orchestration core:
//! - `JobService`: transactional custodian of the job/step state machine
//! - `AgentLoop`: per-step worker routine driving the multi-turn
//!   conversation, code actions, and snapshot/restore
//! - `StepScheduler`: periodic claim driver with a bounded worker pool
//!   and the stall-reclamation sweep

pub mod agent;
pub mod scheduler;
pub mod service;

pub use agent::{AgentLoop, AgentLoopConfig};
pub use scheduler::{SchedulerConfig, StepScheduler};
pub use service::{JobService, ServiceError, SubmitJob, MAX_ATTEMPTS};
