//! Spider execution engine
//!
//! # Components
//!
//! - `Orchestrator`: starts, stops and tracks runs; serves direct calls
//! - `ExecutionRegistry`: in-memory record of in-flight executions
//! - `rate_limit`: direct-call spacing per spider
//! - `Layout`: where programs, outputs and raw stream logs live on disk

pub mod direct;
mod layout;
mod orchestrator;
pub mod rate_limit;
mod registry;

pub use direct::{parse_direct_result, DirectCallResult, DirectFailure};
pub use layout::Layout;
pub use orchestrator::Orchestrator;
pub use rate_limit::RateDecision;
pub use registry::{ExecutionRecord, ExecutionRegistry, ExecutionSignals, ExecutionSnapshot, StopTicket};
