//! dstc-core — wire format, argument codec, and configuration.
//! No I/O lives here; the call plane in the `dstc` crate builds on this one.

pub mod codec;
pub mod config;
pub mod wire;

pub use codec::{Arg, ArgList, Blob, CallbackRef, CodecError, Cursor};
pub use config::{DstcConfig, LogLevel};
