// src/core/mod.rs

// The scanning engine, independent of the terminal front-end. `main` and the
// UI only talk to it through `scanner::Scanner` and the types in `models`.

/// Targets, per-target results and the run aggregate.
pub mod models;

pub mod errors;

/// Run settings and their environment overrides.
pub mod config;

/// Raw input expansion and deduplication.
pub mod targets;

pub mod signatures;

/// Signature analyzers run over each probed target.
pub mod analyzer;

pub mod phash;

/// Similarity grouping of finished results.
pub mod cluster;

/// The per-target pipeline and its stages (prober, renderer, retries).
pub mod scanner;

pub mod store;
