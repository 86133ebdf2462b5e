//! HTTP API handlers for ucv-bills

pub mod entries;
pub mod health;
pub mod identity;

pub use entries::{entry_routes, UploadLimits};
pub use health::health_routes;
pub use identity::{OwnerId, ReviewerId};
