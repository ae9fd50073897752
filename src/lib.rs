// Core modules
pub mod config;
pub mod embedding_classifier;
pub mod error;
pub mod llm_classifier;
pub mod metrics;
pub mod orchestrator;
pub mod pattern_matcher;

// API layer support
pub mod csv_io;
pub mod job_store;

// Dependency injection traits for testing
pub mod traits;
