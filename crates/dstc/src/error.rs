//! Call-plane error kinds.
//!
//! Unroutable inbound records (unknown name, unknown callback handle) are
//! deliberately absent: the dispatcher logs or drops those without
//! surfacing them, so one peer's stale registration cannot error another
//! peer's event loop.

use dstc_core::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum DstcError {
    /// Transport bind/join failed or the configuration is unusable.
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    /// Duplicate name at registration time. Fatal at startup.
    #[error("duplicate registration of '{0}'")]
    RegistrationConflict(String),

    /// Name is empty, non-ASCII, or collides with protocol bytes.
    #[error("invalid function name '{0}'")]
    InvalidName(String),

    /// A single call can never fit one datagram.
    #[error("encoded call is {size} bytes, datagram capacity is {capacity}")]
    EncodeOverflow { size: usize, capacity: usize },

    /// Calls and event processing require a prior `activate`.
    #[error("node is not activated")]
    NotActivated,

    #[error("node is already activated")]
    AlreadyActivated,

    /// Surfaced from the transport adapter unchanged.
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),
}
