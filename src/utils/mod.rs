//! # Utility Modules
//!
//! Supporting utilities used throughout the crate.
//!
//! ## Components
//! - **Logging**: Structured logging configuration

pub mod logging;
