//! lexvault-common: Shared error type and the allowlisted HTTP client used by
//! network-backed producers.

pub mod error;
pub mod sandbox;

pub use error::{LexvaultError, Result};
pub use sandbox::SandboxClient;
