#![deny(unsafe_code)]

//! Terminal front-end for a local inference server.
pub mod app;
pub mod command;
pub mod render;
/// Persisted settings.
pub mod settings;
