//! # UCV Common Library
//!
//! Shared code for the utility-consumption verification services:
//! - Error and result types
//! - Configuration loading and root folder resolution
//! - Database initialization and schema

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
