// src/source/mod.rs
//! Job document source
//!
//! - **document**: the declarative document (job specs, `global` section),
//!   spec identity, parsed snapshots
//! - **fetch**: ordered file/remote locations with backup, periodic refresh
//!   and a cancellable snapshot stream

pub mod document;
pub mod fetch;

pub use document::{
    BackoffPolicy, ConfigDocument, ConfigFormat, ConfigSnapshot, GlobalConfig, GlobalSection, JobSpec,
    SpecKey,
};
pub use fetch::{BackupDocument, ConfigLocation, ConfigSource, RawConfig};
