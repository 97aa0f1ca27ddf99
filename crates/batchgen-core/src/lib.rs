//! Functional core of the batch generation scheduler.
//!
//! Everything in this crate is pure: it operates on an in-memory [`Queue`] and
//! returns decisions or reports. Loading, saving, subprocesses and sleeping are
//! the runner's job.

pub mod backoff;
pub mod breaker;
pub mod constraint;
pub mod error;
pub mod ids;
pub mod model;
pub mod reorder;
pub mod report;
pub mod requeue;
pub mod select;
pub mod summary;
pub mod update;

pub use backoff::*;
pub use breaker::*;
pub use constraint::*;
pub use error::*;
pub use ids::*;
pub use model::*;
pub use reorder::*;
pub use report::*;
pub use requeue::*;
pub use select::*;
pub use summary::*;
pub use update::*;
