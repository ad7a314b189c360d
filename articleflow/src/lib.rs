//! # Articleflow
//!
//! Staged generation of long-form technical articles.
//!
//! An article is produced by seven stages run in a fixed order over one
//! shared, accumulating [`ArticleState`](state::ArticleState):
//!
//! - **Research**: search the web and summarize background
//! - **Plan**: produce the outline, title and subtitle
//! - **Write**: draft every section with bounded concurrency
//! - **Code**: fill `[CODE: id - description]` placeholders
//! - **Illustrate**: Mermaid diagrams and generated images
//! - **Review**: score the draft and revise flagged sections
//! - **Assemble**: render the final Markdown document
//!
//! Stages never write the state directly. They return a
//! [`StateDelta`](state::StateDelta) that the engine validates and commits.
//! Every task has a replayable [`ProgressLog`](events::ProgressLog).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use articleflow::prelude::*;
//!
//! let adapters = AdapterSet::new(Arc::new(my_llm), Arc::new(my_search));
//! let engine = WorkflowEngine::new(adapters, PromptTemplates::with_defaults(), &EngineConfig::default());
//! let manager = TaskManager::new(TaskManagerConfig::default(), engine)?;
//!
//! let id = manager.submit("Redis basics", ArticleConfig::default())?;
//! let mut events = manager.progress(id)?.subscribe(0);
//! while let Some(event) = events.next().await {
//!     println!("{}", event.event.name());
//! }
//! let article = manager.result(id)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod adapters;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod observability;
pub mod stages;
pub mod state;
pub mod tasks;
pub mod templates;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapters::{
        AdapterSet, GenerationRequest, ImageGenerator, ImageRef, SearchHit, SearchProvider,
        TextGenerator,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{
        ArticleConfig, ArticleType, Audience, EngineConfig, LoadConfig, TargetLength,
        TaskManagerConfig,
    };
    pub use crate::core::{ExecutionStatus, StageKind, TaskId};
    pub use crate::engine::{EngineOutcome, RetryConfig, WorkflowEngine};
    pub use crate::errors::{
        AdapterError, ArticleflowError, StageFailure, StateConflictError, TaskError,
    };
    pub use crate::events::{
        EventEnvelope, EventSink, LoggingEventSink, NoOpEventSink, ProgressEvent, ProgressLog,
    };
    pub use crate::stages::{Stage, StageContext, StageOutcome, StageResult};
    pub use crate::state::{ArticleSnapshot, ArticleState, ReadView, StateDelta, StateField};
    pub use crate::tasks::{ExecutionSummary, TaskManager, TaskResult};
    pub use crate::templates::{PromptTemplates, TemplateVars};
}
