//! Worldlines: an ingestion and enrichment pipeline for structural-change
//! signals.
//!
//! Items flow one way: source adapters produce raw items, ingestion
//! normalizes and deduplicates them, then the orchestrator advances each
//! item through classification, exposure mapping, temporal linking, and
//! cluster synthesis. Every stage reads its backlog from the store and
//! writes its result back, so stages are independently resumable.

pub mod analysis;
pub mod config;
pub mod dedup;
pub mod error;
pub mod exposure;
pub mod ingest;
pub mod linking;
pub mod llm;
pub mod notify;
pub mod pipeline;
pub mod prompts;
pub mod storage;
pub mod synthesis;
