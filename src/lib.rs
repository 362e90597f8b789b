//! Parallel AWS and Azure inventory scanner.
//!
//! A scan fans out over every region (AWS) or active resource group (Azure)
//! of one account on a shared worker pool, merges the per-scope listings
//! into one [`scan::AggregateResult`], caches it for a short time and can
//! persist it as a snapshot. Stored snapshots can be compared, reported and
//! handed to a language model to answer questions.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod insight;
pub mod logging;
pub mod platform;
pub mod report;
pub mod scan;
pub mod server;
pub mod store;
