//! dstc — distributed calls over multicast datagrams.
//!
//! A process registers named client and server functions at startup, then
//! activates. A client call serializes its arguments into a call record,
//! the batcher packs records into datagrams, and the transport multicasts
//! them; every node with a matching server registration decodes and invokes
//! locally. At-least-once, one-to-many, fire-and-forget — with an explicit
//! callback mechanism for replies to the originator.
//!
//! ```no_run
//! # async fn example() -> Result<(), dstc::DstcError> {
//! use std::time::Duration;
//!
//! let mut node = dstc::DstcNode::setup().await?;
//! node.register_server::<(i32,), _>("print_value", |_origin, (value,)| {
//!     println!("got {value}");
//!     Ok(())
//! })?;
//! let send_value = node.register_client::<(i32,)>("send_value")?;
//! node.activate().await?;
//!
//! send_value.call((4711,))?;
//! loop {
//!     node.process_events(Duration::from_millis(100)).await?;
//! }
//! # }
//! ```

pub mod batcher;
pub mod logging;
pub mod peer;
pub mod registry;
pub mod transport;

mod dispatch;
mod error;
mod node;

pub use batcher::BatchMode;
pub use error::DstcError;
pub use node::{ClientFunction, DstcHandle, DstcNode};
pub use registry::CallOrigin;
pub use transport::{LocalBus, LocalEndpoint, Transport, UdpMulticastTransport};

// The codec and config types users touch directly.
pub use dstc_core::codec::{Arg, ArgList, Blob, CallbackRef};
pub use dstc_core::config::{DstcConfig, LogLevel};
