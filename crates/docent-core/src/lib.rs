//! Configuration loading and index bootstrap for docent.

pub mod bootstrap;
pub mod config;
