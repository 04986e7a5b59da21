//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `templecast` application.
//!
//! It centralizes the crate-wide error type and the tracing setup shared by
//! the server and the client binaries.

pub mod error;
pub mod logging;

pub use error::{Result, TempleCastError};
