//! Built-in channel providers.

pub mod local;

pub use local::LocalProvider;
