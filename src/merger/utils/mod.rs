//! Shared helpers: filesystem operations and glob rules.

pub mod fs;
pub mod glob;
