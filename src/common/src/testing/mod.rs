//! Test utilities for purgeline.
//!
//! Only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```

mod config_builder;

pub use config_builder::TestConfigBuilder;
