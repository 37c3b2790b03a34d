// Error taxonomy
pub mod error;

// File/env configuration and the layered config store
pub mod config;

// Event model and bus
pub mod event;

// Module manifests, lifecycle and registry
pub mod module;

// Route table and request pipeline
pub mod gateway;

// Caller identity
pub mod auth;

// Storage collaborator
pub mod storage;

// Composition root
pub mod orchestrator;

// HTTP APIs
pub mod api;

pub use error::{CoreError, CoreResult};
pub use orchestrator::{Core, CoreBuilder};
