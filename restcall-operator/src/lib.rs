pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod key;
pub mod queue;
pub mod router;
pub mod runtime;
pub mod store;

pub use config::{BackoffConfig, ControllerConfig, HttpClientConfig, OperatorConfig};
pub use controllers::{error_policy, reconcile, Action, Context, ContextData, Retry};
pub use crd::{RestCall, RestCallSpec, RestCallStatus};
pub use error::{ErrorClass, OperatorError, Result};
pub use key::ObjectKey;
pub use queue::{ExponentialBackoff, WorkQueue};
pub use router::EventRouter;
pub use runtime::Controller;
pub use store::{ChangeType, KubeStore, MemoryStore, ResourceStore, WatchEvent};
