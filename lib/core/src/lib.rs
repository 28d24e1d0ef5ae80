//! Core types and utilities for the switchyard integration framework.
//!
//! This crate provides the foundational types and error handling shared
//! by the framework crate and the binaries built on top of it.

pub mod error;
pub mod name;

pub use error::Result;
pub use name::{IntegrationName, ParseNameError};
