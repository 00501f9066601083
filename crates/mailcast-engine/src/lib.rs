//! # Mailcast Engine
//!
//! The periodic mailing job. Each invocation is a finite pass:
//!
//! ```text
//! tick(now)
//!   ├── StatusAdvancer   created → started once start_time ≤ now (conditional)
//!   └── DispatchEngine   started campaigns
//!         ├── end_time < now        → finished, no dispatch
//!         └── start < now < end     → one job per recipient
//!               ├── pair lock (campaign, recipient)
//!               ├── due?  latest attempt + cadence (1/7/30 days)
//!               ├── claim the pair in the store (other processes)
//!               ├── Transport.send  (bounded workers, per-send timeout)
//!               ├── OperatorAlert   on transport error, best effort
//!               └── AttemptLog.append (always last, drops the claim)
//! ```
//!
//! `StatisticsCache` serves per-owner counts; `run_periodic` drives `tick`
//! on a tokio interval for deployments without an external trigger.

pub mod advance;
pub mod alert;
pub mod due;
pub mod engine;
pub mod locks;
pub mod service;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod testing;

pub use advance::{AdvanceReport, StatusAdvancer};
pub use alert::{AdminMailAlert, FanoutAlert, TracingAlert, WebhookAlert, alerts_from_config};
pub use due::Decision;
pub use engine::{CycleReport, DispatchEngine, DispatchSettings, ItemError};
pub use locks::PairLocks;
pub use service::{Mailcast, TickReport, run_periodic};
pub use stats::{OwnerStats, StatisticsCache};
pub use transport::SmtpTransport;
