// src/ui/widgets/mod.rs

// One module per screen region, plus the disclaimer overlay.
pub mod cluster_view; // Visual clusters of the finished run.
pub mod disclaimer_popup;
pub mod footer; // Key hints for the current state.
pub mod input;
pub mod summary; // Counters, progress and top technologies.
