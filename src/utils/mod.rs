//! Shared helpers

pub mod image;
