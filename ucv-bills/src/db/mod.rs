//! Database access for ucv-bills
//!
//! Schema creation lives in `ucv_common::db`; this module holds the entry queries.

pub mod entries;
pub mod retry;

pub use retry::retry_on_lock;
