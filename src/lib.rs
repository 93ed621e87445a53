//! Snaplens library
//!
//! Webcam capture with face age/gender estimation, text recognition and
//! one-shot location tagging.

pub mod api;
pub mod args;
pub mod capture;
pub mod config;
pub mod display;
pub mod engine;
pub mod location;
pub mod service;
pub mod utils;

pub use config::Config;
