//! Core traits for the harvester's pluggable seams.

pub mod adapter;
pub mod clock;
pub mod fetcher;
pub mod store;
