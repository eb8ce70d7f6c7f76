//! # Tessera Testkit
//!
//! Test utilities for Tessera.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Property-based test generators using proptest
//! - A model harness that checks workloads against an in-memory model
//! - Stress testing utilities for deletes racing compactions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         create_test_table(db, TEST_TABLE).unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
