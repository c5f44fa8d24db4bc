pub mod restcall;

pub use restcall::{RestCall, RestCallSpec, RestCallStatus};
