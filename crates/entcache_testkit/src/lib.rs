//! # entcache Testkit
//!
//! Test utilities for entcache.
//!
//! This crate provides:
//! - A sales domain metadata fixture and manager helpers
//! - In-memory query and save servers implementing the transports
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entcache_testkit::prelude::*;
//!
//! #[test]
//! fn saves_new_customer() {
//!     let manager = sales_manager();
//!     let server = InMemorySaveServer::new(sales_metadata());
//!     let customer = new_customer(&manager, "Alfreds");
//!     manager.save_changes(None, None, &server).unwrap();
//!     assert!(!customer.has_temp_key());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::init_tracing;
pub use server::*;
