//! # Larder Core
//!
//! Core types for the Larder cache orchestration layer: the unified error
//! taxonomy, result aliases and tracing bootstrap shared by every crate.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::*;

// Re-export shaku for dependency injection
pub use shaku::{module, Component, HasComponent, Interface, Module};
