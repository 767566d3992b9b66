//! Plugins bundled with the binary.

pub mod builtin;

pub use builtin::BuiltinPlugin;
