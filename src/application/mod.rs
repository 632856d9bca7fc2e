//! Command handling for the binary.

pub mod commands;
pub mod error;
