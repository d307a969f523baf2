//! Configuration structures for merge operations.
//!
//! [`MergeOptions`] is the immutable input to one merge, constructed with
//! [`MergeOptionsBuilder`]. [`Arch`] names the two architectures involved.

mod arch;
mod builder;
mod options;

pub use arch::Arch;
pub use builder::MergeOptionsBuilder;
pub use options::MergeOptions;
