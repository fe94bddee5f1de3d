//! Data models

pub mod endpoint;
pub mod request;
pub mod stats;

pub use endpoint::*;
pub use request::*;
pub use stats::*;
