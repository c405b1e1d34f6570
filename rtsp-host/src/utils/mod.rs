//! Utils module - Utility functions
//!
//! Contains surface snapshot saving.

mod screenshot;

pub use screenshot::{save_surface_snapshot, SnapshotError};
