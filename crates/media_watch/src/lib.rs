//! Visual regression harness for third-party media embeds.
//!
//! Each catalog case is rendered to HTML by the embedding library, loaded in
//! a headless browser, captured and scored against a stored baseline with
//! `dssim`. Several harness processes may share one scratch directory; the
//! fixture file of a case is its claim.

pub mod baseline;
/// Screenshot decode, crop and PNG encoding
pub mod capture;
pub mod catalog;
pub mod comparator;
pub mod config;
/// Scratch fixtures and the cross-shard claim
pub mod fixture;
pub mod render;
pub mod report;
pub mod runner;
/// `dssim` resolution and invocation
pub mod scorer;
pub mod session;

pub use catalog::{Catalog, TestCase};
pub use config::{HarnessConfig, RunMode, Viewport};
pub use report::{CaseFailure, CaseReport, CaseStatus, RunReport, SkipReason};
pub use runner::{Runner, select_cases};
