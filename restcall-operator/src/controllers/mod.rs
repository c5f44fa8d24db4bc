pub mod call;
pub mod restcall;

pub use restcall::{error_policy, reconcile, Action, Context, ContextData, Retry};
