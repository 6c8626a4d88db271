#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod backplane;
pub mod error;
pub mod remote;

pub use backplane::{Backplane, InvalidationMessage, MessageStream};
pub use error::{BackendError, BackendResult};
pub use remote::RemoteStore;
