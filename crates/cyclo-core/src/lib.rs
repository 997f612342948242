//! The task proxy lifecycle engine: the pure state-machine core of a
//! cycling workflow scheduler, with no network, filesystem, or database
//! dependency of its own.
//!
//! Persistence (`cyclo-db`), the process pool, and every other external
//! collaborator are contracts this crate defines and consumes, never
//! implementations it owns. Callers drive a
//! [`proxy::TaskProxy`] per active task instance, feed it events and
//! process-pool callbacks, and drain its [`delta::PendingDeltas`] into a
//! [`delta::DeltaSink`].

pub mod batch_system;
pub mod cycle_point;
pub mod delta;
pub mod error;
pub mod event_handler;
pub mod identity;
pub mod message;
pub mod outputs;
pub mod pool;
pub mod proxy;
pub mod submission;
pub mod summary;
pub mod task_def;
pub mod task_state;
pub mod try_state;

pub use error::{CoreError, CoreResult};
pub use identity::TaskId;
pub use proxy::TaskProxy;
pub use task_state::TaskStatus;
