//! Downstream analysis engine abstraction.
//!
//! This module provides a `Dispatcher` trait for handing reports to the
//! analysis engine, with an HTTP implementation.

mod http;
mod types;

pub use http::HttpDispatcher;
pub use types::*;
