//! Command implementations for posetrain.

pub mod checkpoints;
pub mod train;
