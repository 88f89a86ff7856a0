//! Braid Engine
//!
//! This crate drives compiled workflows to completion: it dispatches ready
//! steps under a concurrency bound, applies cascade-on-failure, and handles
//! pause/resume and cancellation, persisting every transition.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  - start / cancel / resume / get_state / wait / recover     │
//! │  - compiles definitions, owns collaborators                 │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ one per execution
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Scheduler (loop)                         │
//! │  - owns ExecutionState, persists after each transition      │
//! │  - readiness, skipping, cascade, semaphore-bounded dispatch │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ spawned, reports over mpsc
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        StepUnit                             │
//! │  - governance → resolve → validate → execute (timeout)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use braid_engine::{Engine, EngineConfig};
//! use braid_store::MemoryStore;
//!
//! let engine = Engine::builder(Arc::new(MemoryStore::new()))
//!   .config(EngineConfig::default().with_max_parallel_steps(4))
//!   .build()?;
//!
//! let state = engine.run(definition).await?;
//! ```

mod builtin;
mod config;
mod engine;
mod error;
mod events;
mod executor;
mod governance;
mod scheduler;
mod step;

pub use builtin::{AwaitInputExecutor, EchoExecutor, FailExecutor, NoopExecutor, SleepExecutor};
pub use config::{ConfigError, DEFAULT_MAX_PARALLEL_STEPS, DEFAULT_STEP_TIMEOUT_MS, EngineConfig};
pub use engine::{Engine, EngineBuilder};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, FanoutNotifier, NoopNotifier, NotifyError};
pub use executor::{ExecutorError, ExecutorRegistry, StepContext, StepExecutor, StepOutcome};
pub use governance::{AllowAll, CapabilityDenyList, GovernanceCheck, GovernanceDecision, GovernanceRequest};
