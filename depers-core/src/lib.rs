//! The batched transformation pipeline core: fan-out connection and schema introspection (C1/C2),
//! idempotent preparation and teardown (C3/C4), the transformer family and pipeline skeleton
//! (C5/C6), the trim worker (C7), and the run controller (C9) that ties them together under every
//! exit path. C8 (the metrics sink) lives in the sibling `depers-metrics` crate.
#![deny(rustdoc::missing_crate_level_docs)]

pub mod controller;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod prepare;
pub mod teardown;
pub mod transform;
pub mod trim;

pub use error::{Error, Result};
