//! meshreg daemon: keeps the service registry in step with instance lifecycle.
//!
//! Notifications from the manifest source are folded into the instance store
//! and handed to the [`Dispatcher`], which calls the registrar and pushes
//! failures onto the [`RetryQueue`]. Retry workers replay them; the status API
//! serves the store read-only.

pub mod api;
pub mod dispatcher;
mod error;
pub mod queue;
mod runtime;
pub mod source;
pub mod store;

pub use dispatcher::{Decision, Dispatcher, Notification, Payload, Skip};
pub use error::DaemonError;
pub use queue::{Action, RetryPolicy, RetryQueue, WorkItem, WorkKey};
pub use runtime::{run, start_blocking, DaemonSettings, DEFAULT_LISTEN, DEFAULT_RETRY_WORKERS};
pub use store::InstanceStore;
