//! Common utilities and types shared across edgeboot crates.

pub mod error;
pub mod platform;
pub mod redact;
pub mod timestamp;

pub use error::{Error, Result};
pub use platform::Arch;
pub use timestamp::Timestamp;
