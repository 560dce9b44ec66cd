//! Execution engine for hostform
//!
//! The engine orchestrates:
//! 1. Planning - Build one validated run plan per selected host
//! 2. Executing - Converge hosts in parallel, one coordinator each
//! 3. Reporting - Render ledgers, diffs and handler outcomes

pub mod differ;
pub mod executor;
pub mod planner;

pub use differ::{display_report, to_json};
pub use executor::{ExecuteOptions, execute};
pub use planner::{HostJob, build_jobs};
