//! The action pipeline.
//!
//! An action is an ordered chain of [`Stage`]s, each wrapping the rest of
//! the chain. Plugins register named sequences in an [`ActionRegistry`] and
//! attach [`Hook`]s to each other's actions; the [`Runner`] applies the
//! hooks, builds a [`Runnable`] and drives it through one [`Environment`].

mod builder;
pub mod builtin;
mod environment;
mod hook;
mod registry;
mod runner;
mod stage;

use thiserror::Error;

pub use builder::{Builder, Guard, Runnable, StageFactory, StageSpec};
pub use environment::{BuildParams, Environment};
pub use hook::{Hook, HookRegistry, ALL_ACTIONS};
pub use registry::ActionRegistry;
pub use runner::Runner;
pub use stage::{fn_stage, FnStage, Next, Stage};

/// Errors raised while building or running a pipeline.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum ActionError {
    #[error("unknown action or sequence `{name}`")]
    #[diagnostic(code(vagabond::action::unknown_sequence))]
    UnknownSequence { name: String },

    #[error("sequence references form a cycle: {}", .chain.join(" -> "))]
    #[diagnostic(code(vagabond::action::sequence_cycle))]
    SequenceCycle { chain: Vec<String> },

    #[error("no stage named `{name}`")]
    #[diagnostic(code(vagabond::action::stage_not_found))]
    StageNotFound { name: String },

    #[error("cannot insert at position {index} of {len} stages")]
    #[diagnostic(code(vagabond::action::invalid_position))]
    InvalidPosition { index: usize, len: usize },

    #[error("environment has no `{key}` of type {type_name}")]
    #[diagnostic(code(vagabond::action::missing_value))]
    MissingValue {
        key: String,
        type_name: &'static str,
    },

    #[error("interrupted")]
    #[diagnostic(code(vagabond::action::interrupted))]
    Interrupted,
}

impl ActionError {
    /// Whether `err` is, or wraps, an interruption.
    pub fn is_interrupt(err: &anyhow::Error) -> bool {
        err.chain().any(|e| {
            matches!(
                e.downcast_ref::<ActionError>(),
                Some(ActionError::Interrupted)
            )
        })
    }
}
