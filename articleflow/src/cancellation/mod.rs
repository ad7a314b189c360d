//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is shared between the task manager (which
//! requests cancellation) and the workflow engine (which honours it at the
//! next safe point).

mod token;

pub use token::CancellationToken;
