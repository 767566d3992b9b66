//! Vagabond - an orchestration kernel for development machines
//!
//! This crate provides the core library functionality for Vagabond: the
//! action pipeline, capability dispatch, the machine index and box version
//! resolution, plus the plugin boundary that wires them together.

pub mod action;
pub mod boxes;
pub mod capability;
pub mod index;
pub mod plugin;
pub mod plugins;
pub mod util;

/// Test utilities for vagabond unit tests.
///
/// Only compiled for tests. Provides a capturing environment, a scripted
/// probe, recording stages and on-disk fixtures.
#[cfg(test)]
pub mod test_support;

pub use action::{Builder, Environment, Runner, Stage};
pub use boxes::{BoxCollection, BoxVersion, Constraint, InstalledBox};
pub use capability::{CapabilityHost, CapabilityRegistry, SubjectKind};
pub use index::{Entry, MachineIndex};
pub use plugin::{Components, Plugin, PluginManager};
pub use util::context::GlobalContext;
