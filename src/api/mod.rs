//! API module - REST handlers serving the page and its data

pub mod rest;
pub mod dto;

pub use rest::{create_rest_router, AppState};
