//! transmux: a server-side video transcoding orchestrator.
//!
//! Accepts transcode requests, selects and supervises codec-tool worker
//! processes, tracks per-session lifecycle in a durable store,
//! deduplicates concurrent work on identical content, and publishes
//! output artifacts under a content-addressable layout.

pub mod cleanup_service;

pub mod configuration;

pub mod content_store;

pub mod controller;

pub mod error_handling;

pub mod media;

pub mod provider_registry;

pub mod resource_manager;

pub mod session_manager;

pub mod session_store;

pub mod worker_supervisor;

pub use controller::Orchestrator;

pub use error_handling::types::TranscodeError;

pub use session_manager::manager::SessionManager;
