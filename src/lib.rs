//! Import and incident-resolution pipeline for bulk address-record (huella)
//! files.
//!
//! The client side (`services::{policy, extractor, corrections, registry}`)
//! drives an import through upload, validation and the per-line correction
//! loop against any [`services::backend::ImportBackend`]. The remaining
//! modules implement that backend: an HTTP API over PostgreSQL, S3-compatible
//! storage and a Redis queue feeding the validation worker.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
