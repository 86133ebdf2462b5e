//! Data models for ucv-bills

pub mod consumption_entry;

pub use consumption_entry::{
    clamp_confidence, ConsumptionEntry, DataSource, VerificationSource, VerificationStatus,
};
