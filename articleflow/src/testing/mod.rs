//! Testing utilities for articleflow.
//!
//! This module provides:
//! - Scripted text, search and image adapters
//! - Article state fixtures at each pipeline milestone
//! - A harness that runs a single stage against a state

pub mod fixtures;
mod scripted;

pub use scripted::{ScriptedImageGenerator, ScriptedTextGenerator, StaticSearchProvider};
