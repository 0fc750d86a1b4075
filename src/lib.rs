//! Quota-aware usage monitor for an LLM coding assistant's on-disk journal.
//!
//! The crate is a read-only companion to an external producer process: it
//! never mutates the journal it observes. The core is a four-layer
//! pipeline —
//!
//! 1. [`scanner`] + [`parser`] + [`cache`] ([`ingest`] ties them together) —
//!    incrementally discover and parse journal files into normalized
//!    [`models::UsageEvent`]s.
//! 2. [`detector`] + [`window_history`] — group events into non-overlapping
//!    5-hour quota windows ("sessions"), persisted across restarts.
//! 3. [`aggregator`] + [`pricing`] — roll sessions into cost/token/burn-rate
//!    metrics.
//! 4. [`orchestrator`] + [`snapshot`] — decouple a slow data-refresh cadence
//!    from a fast UI-render cadence and publish an immutable
//!    [`snapshot::Snapshot`] for a renderer to consume.
//!
//! [`batch`] and [`detect_report`] are one-shot consumers of the same
//! ingest/detect/aggregate stack, used by the `<root>`/`detect` CLI
//! subcommands instead of the live `top` loop.

pub mod aggregator;
pub mod batch;
pub mod cache;
pub mod config;
pub mod detect_report;
pub mod detector;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod pricing;
pub mod report;
#[cfg(feature = "live")]
pub mod render;
pub mod scanner;
pub mod snapshot;
pub mod timefmt;
pub mod window_history;

pub use error::{MonitorError, Result};
