//! Function registry — the per-process name and handle tables.
//!
//! Three mappings: client names (outbound stubs), server names (inbound
//! decoder + local function), and callback handles (ephemeral reply
//! dispatchers). Client and server names are sealed once the node
//! activates; callback entries stay additive for the life of the process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::Result;
use bytes::Bytes;
use dashmap::DashMap;

use dstc_core::codec::{ArgList, CallbackRef, Cursor};
use dstc_core::wire;

use crate::DstcError;

/// Identity of the node a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOrigin {
    pub node_id: u32,
}

/// An inbound dispatcher: decodes a payload and invokes the bound local
/// function. Failures are logged by the dispatcher, never propagated to
/// other records.
pub(crate) type Handler = Box<dyn Fn(CallOrigin, Bytes) -> Result<()> + Send + Sync>;

/// Adapt a typed closure into a payload [`Handler`] for its declared
/// argument tuple. This is where the declaration-site shape meets the wire.
pub(crate) fn decoding_handler<A, F>(f: F) -> Handler
where
    A: ArgList + 'static,
    F: Fn(CallOrigin, A) -> Result<()> + Send + Sync + 'static,
{
    Box::new(move |origin, payload| {
        let mut cur = Cursor::new(payload);
        let args = A::decode(&mut cur)?;
        f(origin, args)
    })
}

pub(crate) struct Registry {
    clients: DashMap<String, ()>,
    servers: DashMap<String, Handler>,
    callbacks: DashMap<u64, Handler>,
    next_callback: AtomicU64,
    sealed: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            servers: DashMap::new(),
            callbacks: DashMap::new(),
            // Handle 0 is the null callback, never minted.
            next_callback: AtomicU64::new(1),
            sealed: AtomicBool::new(false),
        }
    }

    /// No more client/server registrations; the node is serving.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    fn check_registration(&self, name: &str) -> Result<(), DstcError> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(DstcError::AlreadyActivated);
        }
        if !wire::valid_name(name) {
            return Err(DstcError::InvalidName(name.to_owned()));
        }
        Ok(())
    }

    pub fn register_client(&self, name: &str) -> Result<(), DstcError> {
        self.check_registration(name)?;
        match self.clients.entry(name.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(DstcError::RegistrationConflict(name.to_owned()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Ok(())
            }
        }
    }

    pub fn register_server(&self, name: &str, handler: Handler) -> Result<(), DstcError> {
        self.check_registration(name)?;
        match self.servers.entry(name.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(DstcError::RegistrationConflict(name.to_owned()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Mint a fresh handle and install its dispatcher. Permitted at any
    /// point in the process lifetime.
    pub fn activate_callback(&self, handler: Handler) -> CallbackRef {
        let handle = self.next_callback.fetch_add(1, Ordering::Relaxed);
        self.callbacks.insert(handle, handler);
        CallbackRef::from_raw(handle)
    }

    /// Remove a callback dispatcher. Later records naming the handle are
    /// silently dropped. Returns false if the handle was not registered.
    pub fn cancel_callback(&self, handle: CallbackRef) -> bool {
        self.callbacks.remove(&handle.raw()).is_some()
    }

    /// Invoke the server function bound to `name`. `None` when the name is
    /// not registered here.
    pub fn call_server(&self, name: &str, origin: CallOrigin, payload: Bytes) -> Option<Result<()>> {
        self.servers
            .get(name)
            .map(|handler| (handler.value())(origin, payload))
    }

    /// Invoke the callback dispatcher bound to `handle`.
    pub fn call_callback(
        &self,
        handle: CallbackRef,
        origin: CallOrigin,
        payload: Bytes,
    ) -> Option<Result<()>> {
        self.callbacks
            .get(&handle.raw())
            .map(|handler| (handler.value())(origin, payload))
    }

    /// The server-function names this node announces.
    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|entry| entry.key().clone()).collect()
    }
}
