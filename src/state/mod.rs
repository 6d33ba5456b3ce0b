//! State module for tracking spider and execution lifecycles
//!
//! # Components
//!
//! - `SpiderStatus`: persisted status of a spider (inactive, running, error, stopped)
//! - `ExecutionPhase`: in-memory phase of a single in-flight execution

mod execution_phase;
mod spider_status;

// Re-export main types
pub use execution_phase::ExecutionPhase;
pub use spider_status::SpiderStatus;
