pub mod api;
pub mod config;
pub mod error;
pub mod error_payload;
pub mod identity;
pub mod port_alloc;
pub mod profile;
pub mod provisioning;
pub mod public_url;
pub mod request_meta;
pub mod runtime;
pub mod session_manager;

#[cfg(test)]
mod testing;

pub use error::SessionError;
pub use session_manager::{SessionConfig, SessionManager};
