//! Domain types shared by every component.

pub mod config;
pub mod content;
pub mod document;
pub mod run;
pub mod source;
