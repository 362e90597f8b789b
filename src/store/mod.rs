//! SQLite snapshot storage.
//!
//! Every completed scan is appended to a single `snapshots` table as one
//! JSON document per row, tagged with its provider. Rows are never updated;
//! the latest snapshot of a provider is the one with the greatest timestamp.
//!
//! Supports:
//! - Auto-save after every scan
//! - Listing snapshots, optionally per provider
//! - Loading a specific snapshot by ID
//! - Comparing two snapshots (see [`diff`])

pub mod diff;
pub mod snapshot;

pub use snapshot::{SnapshotInfo, Store, StoredSnapshot};
