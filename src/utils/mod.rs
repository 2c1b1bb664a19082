// src/utils/mod.rs
//! Shared utilities: process settings and the crate error type

pub mod config;
pub mod errors;
