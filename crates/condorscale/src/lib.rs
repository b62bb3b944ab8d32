#![deny(clippy::await_holding_refcell_ref)]

pub mod common;
pub mod provisioner;
pub mod runtime;
pub mod scheduler;

pub type Error = crate::common::error::ScaleError;
pub type Result<T> = std::result::Result<T, Error>;

pub use common::{Map, Set, WrappedRcRefCell};
