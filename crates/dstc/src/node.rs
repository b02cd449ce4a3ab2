//! Node context and lifecycle — the process-wide state tying the
//! registries, batcher, peer view, and transport together.
//!
//! Life of a node: construct (`setup` / `setup2` / `with_transport`),
//! register client and server functions, `activate`, then drive
//! `process_events` from the host's loop. The node never blocks outside
//! `process_events` and owns no background tasks.

use std::io;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use dstc_core::codec::{Arg, ArgList, CallbackRef};
use dstc_core::config::DstcConfig;
use dstc_core::wire::{
    self, Announcement, ANNOUNCE_INTERVAL_SECS, CALLBACK_SENTINEL, DATAGRAM_CAPACITY,
    PEER_TTL_SECS,
};

use crate::batcher::{BatchMode, CallBatcher};
use crate::dispatch;
use crate::peer::PeerView;
use crate::registry::{decoding_handler, CallOrigin, Registry};
use crate::transport::{Transport, UdpMulticastTransport};
use crate::DstcError;

/// How often the peer view is swept for expired entries.
const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Patience with control-endpoint clients before dropping them.
const CONTROL_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

type SendFn = Box<dyn Fn(Bytes) -> io::Result<()> + Send + Sync>;

/// State shared between the node and the stubs/handles it hands out.
struct Shared {
    /// 0 until activation assigns the real id.
    node_id: AtomicU32,
    registry: Registry,
    batcher: Mutex<CallBatcher>,
    peers: PeerView,
    /// Installed at activation; its absence is what makes early calls fail.
    sender: OnceLock<SendFn>,
}

impl Shared {
    fn batcher(&self) -> MutexGuard<'_, CallBatcher> {
        match self.batcher.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn send(&self, datagram: Bytes) -> Result<(), DstcError> {
        let sender = self.sender.get().ok_or(DstcError::NotActivated)?;
        sender(datagram)?;
        Ok(())
    }

    /// Queue one encoded record, transmitting whatever the batcher emits.
    fn queue(&self, name: &[u8], payload: &[u8]) -> Result<(), DstcError> {
        if self.sender.get().is_none() {
            return Err(DstcError::NotActivated);
        }
        let size = wire::record_size(name.len(), payload.len());
        if size > DATAGRAM_CAPACITY {
            return Err(DstcError::EncodeOverflow { size, capacity: DATAGRAM_CAPACITY });
        }
        let emitted = self.batcher().append(name, payload);
        if let Some(datagram) = emitted {
            self.send(datagram)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), DstcError> {
        let emitted = self.batcher().flush();
        if let Some(datagram) = emitted {
            self.send(datagram)?;
        }
        Ok(())
    }

    fn unbuffer(&self) -> Result<(), DstcError> {
        let emitted = self.batcher().unbuffer();
        if let Some(datagram) = emitted {
            self.send(datagram)?;
        }
        Ok(())
    }
}

// ── Client stubs ──────────────────────────────────────────────────────────────

/// Typed outbound stub bound to a function name.
///
/// Obtained from [`DstcNode::register_client`]. The tuple type parameter is
/// the declared argument shape; the matching server registration must
/// declare the same one.
pub struct ClientFunction<A: ArgList> {
    shared: Arc<Shared>,
    name: String,
    _args: PhantomData<fn(A)>,
}

impl<A: ArgList> ClientFunction<A> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encode the arguments and queue one call record.
    ///
    /// In immediate mode this multicasts right away; in buffered mode the
    /// record joins the pending datagram.
    pub fn call(&self, args: A) -> Result<(), DstcError> {
        let mut payload = BytesMut::with_capacity(args.wire_size());
        args.encode(&mut payload);
        self.shared.queue(self.name.as_bytes(), &payload)
    }
}

impl<A: ArgList> Clone for ClientFunction<A> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            name: self.name.clone(),
            _args: PhantomData,
        }
    }
}

// ── Node handle ───────────────────────────────────────────────────────────────

/// Cloneable capability handle onto a node's call plane.
///
/// Server closures capture one of these to issue callback replies from
/// inside a dispatch; client stubs themselves are cloneable and can be
/// captured the same way.
#[derive(Clone)]
pub struct DstcHandle {
    shared: Arc<Shared>,
}

impl DstcHandle {
    /// The node id, once activation has assigned one.
    pub fn node_id(&self) -> Option<u32> {
        match self.shared.node_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// Register a reply closure and mint the handle to send in its place.
    pub fn activate_callback<A, F>(&self, f: F) -> CallbackRef
    where
        A: ArgList + 'static,
        F: Fn(CallOrigin, A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.registry.activate_callback(decoding_handler::<A, F>(f))
    }

    /// Cancel a callback; later records naming it are dropped.
    pub fn cancel_callback(&self, handle: CallbackRef) -> bool {
        self.shared.registry.cancel_callback(handle)
    }

    /// Invoke a callback received as an argument. The null callback is a
    /// no-op, so handlers can pass references through unconditionally.
    pub fn invoke_callback<A: ArgList>(
        &self,
        handle: CallbackRef,
        args: A,
    ) -> Result<(), DstcError> {
        if handle.is_none() {
            return Ok(());
        }
        let mut payload = BytesMut::with_capacity(handle.wire_size() + args.wire_size());
        handle.encode(&mut payload);
        args.encode(&mut payload);
        self.shared.queue(&[CALLBACK_SENTINEL], &payload)
    }

    /// Best-effort: has any live peer announced a server function `name`?
    pub fn remote_function_available(&self, name: &str) -> bool {
        self.shared.peers.remote_function_available(name)
    }

    // Batching controls mirror the node's; callable from any thread.

    pub fn buffer_client_calls(&self) {
        self.shared.batcher().buffer();
    }

    pub fn flush_client_calls(&self) -> Result<(), DstcError> {
        self.shared.flush()
    }

    pub fn unbuffer_client_calls(&self) -> Result<(), DstcError> {
        self.shared.unbuffer()
    }

    pub fn batch_mode(&self) -> BatchMode {
        self.shared.batcher().mode()
    }
}

// ── The node ──────────────────────────────────────────────────────────────────

enum Wake {
    Datagram(io::Result<(Bytes, SocketAddr)>),
    Control(io::Result<TcpStream>),
    Timer,
}

/// A DSTC node: registries, batcher, peer view, and transport.
pub struct DstcNode<T: Transport> {
    shared: Arc<Shared>,
    transport: Arc<T>,
    config: DstcConfig,
    control: Option<TcpListener>,
    control_port: u16,
    activated: bool,
    announce_interval: Duration,
    peer_ttl: Duration,
    next_announce: Instant,
    next_expiry: Instant,
}

impl DstcNode<UdpMulticastTransport> {
    /// Configuration from env/file/defaults, bundled multicast transport.
    pub async fn setup() -> Result<Self, DstcError> {
        Self::setup2(DstcConfig::load()?).await
    }

    /// Explicit configuration, bundled multicast transport.
    pub async fn setup2(config: DstcConfig) -> Result<Self, DstcError> {
        let transport = UdpMulticastTransport::bind(&config)
            .map_err(|e| DstcError::Setup(format!("multicast bind: {e}")))?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> DstcNode<T> {
    /// A node over a caller-supplied transport. Tests and in-process
    /// embeddings come through here with a [`crate::transport::LocalBus`].
    pub fn with_transport(config: DstcConfig, transport: T) -> Self {
        let now = Instant::now();
        Self {
            shared: Arc::new(Shared {
                node_id: AtomicU32::new(0),
                registry: Registry::new(),
                batcher: Mutex::new(CallBatcher::new(0)),
                peers: PeerView::new(config.max_connections),
                sender: OnceLock::new(),
            }),
            transport: Arc::new(transport),
            config,
            control: None,
            control_port: 0,
            activated: false,
            announce_interval: Duration::from_secs(ANNOUNCE_INTERVAL_SECS),
            peer_ttl: Duration::from_secs(PEER_TTL_SECS),
            next_announce: now,
            next_expiry: now,
        }
    }

    pub fn handle(&self) -> DstcHandle {
        DstcHandle { shared: self.shared.clone() }
    }

    pub fn node_id(&self) -> Option<u32> {
        self.handle().node_id()
    }

    /// Bound port of the TCP control endpoint, once activated.
    pub fn control_port(&self) -> Option<u16> {
        self.control.as_ref().map(|_| self.control_port)
    }

    // ── Registration (before activation) ──────────────────────────────────

    /// Install an outbound stub under `name`.
    pub fn register_client<A: ArgList>(
        &self,
        name: &str,
    ) -> Result<ClientFunction<A>, DstcError> {
        self.shared.registry.register_client(name)?;
        Ok(ClientFunction {
            shared: self.shared.clone(),
            name: name.to_owned(),
            _args: PhantomData,
        })
    }

    /// Bind a local function to inbound calls of `name`. The tuple type
    /// parameter declares the argument shape once; the codec does the rest.
    pub fn register_server<A, F>(&self, name: &str, f: F) -> Result<(), DstcError>
    where
        A: ArgList + 'static,
        F: Fn(CallOrigin, A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.registry.register_server(name, decoding_handler::<A, F>(f))
    }

    pub fn activate_callback<A, F>(&self, f: F) -> CallbackRef
    where
        A: ArgList + 'static,
        F: Fn(CallOrigin, A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handle().activate_callback(f)
    }

    pub fn cancel_callback(&self, handle: CallbackRef) -> bool {
        self.handle().cancel_callback(handle)
    }

    pub fn remote_function_available(&self, name: &str) -> bool {
        self.shared.peers.remote_function_available(name)
    }

    // ── Batching controls ─────────────────────────────────────────────────

    pub fn buffer_client_calls(&self) {
        self.handle().buffer_client_calls();
    }

    pub fn flush_client_calls(&self) -> Result<(), DstcError> {
        self.handle().flush_client_calls()
    }

    pub fn unbuffer_client_calls(&self) -> Result<(), DstcError> {
        self.handle().unbuffer_client_calls()
    }

    pub fn batch_mode(&self) -> BatchMode {
        self.handle().batch_mode()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Seal the registries, assign the node id, bind the control endpoint,
    /// and broadcast the first announcement. Client/server registration is
    /// rejected from here on; callbacks stay additive.
    pub async fn activate(&mut self) -> Result<(), DstcError> {
        if self.activated {
            return Err(DstcError::AlreadyActivated);
        }

        let node_id = match self.config.node_id {
            0 => rand::thread_rng().gen_range(1..=u32::MAX),
            id => id,
        };
        self.shared.node_id.store(node_id, Ordering::Release);
        {
            // Re-seat the batcher with the real origin id, keeping any
            // batching mode chosen before activation.
            let mut batcher = self.shared.batcher();
            let mode = batcher.mode();
            *batcher = CallBatcher::new(node_id);
            if mode == BatchMode::Buffered {
                batcher.buffer();
            }
        }

        let control_iface = if self.config.control_listen_iface.is_empty() {
            "0.0.0.0"
        } else {
            self.config.control_listen_iface.as_str()
        };
        let listener = TcpListener::bind((control_iface, self.config.control_listen_port))
            .await
            .map_err(|e| DstcError::Setup(format!("control endpoint bind: {e}")))?;
        self.control_port = listener
            .local_addr()
            .map_err(|e| DstcError::Setup(format!("control endpoint addr: {e}")))?
            .port();
        self.control = Some(listener);

        self.shared.registry.seal();
        let transport = self.transport.clone();
        let _ = self.shared.sender.set(Box::new(move |datagram| transport.send(datagram)));

        self.send_announcement()?;
        let now = Instant::now();
        self.next_announce = now + self.announce_interval;
        self.next_expiry = now + EXPIRY_CHECK_INTERVAL;
        self.activated = true;

        tracing::info!(node_id, control_port = self.control_port, "dstc node activated");
        Ok(())
    }

    /// Flush pending calls and release the transport. Optional: peers
    /// observe TTL-based loss either way.
    pub fn teardown(self) -> Result<(), DstcError> {
        self.shared.flush()?;
        tracing::info!("dstc node torn down");
        Ok(())
    }

    // ── Event processing ──────────────────────────────────────────────────

    /// Time until the nearest internal deadline (announce or expiry sweep).
    /// Hosts multiplexing their own sources size their poll with this.
    pub fn next_timeout(&self) -> Duration {
        self.next_announce
            .min(self.next_expiry)
            .saturating_duration_since(Instant::now())
    }

    /// Drive the node for up to `timeout`: receive and dispatch datagrams,
    /// serve control queries, run due announce/expiry timers.
    ///
    /// Returns the number of records handed to local functions. Comes back
    /// once the timeout has elapsed and no datagram is immediately ready.
    pub async fn process_events(&mut self, timeout: Duration) -> Result<usize, DstcError> {
        if !self.activated {
            return Err(DstcError::NotActivated);
        }

        let deadline = Instant::now() + timeout;
        let mut dispatched = 0;

        loop {
            self.run_timers()?;
            let wake = deadline.min(self.next_announce).min(self.next_expiry);

            let event = {
                let transport = &self.transport;
                let control = &self.control;
                tokio::select! {
                    biased;
                    result = transport.recv() => Wake::Datagram(result),
                    result = accept_control(control) => Wake::Control(result),
                    () = tokio::time::sleep_until(wake.into()) => Wake::Timer,
                }
            };

            match event {
                Wake::Datagram(result) => {
                    let (datagram, from) = result?;
                    let outcome = dispatch::handle_datagram(
                        self.local_node(),
                        &self.shared.registry,
                        &self.shared.peers,
                        datagram,
                        from,
                    );
                    dispatched += outcome.records;
                    if outcome.new_peer {
                        // Fast convergence: let the newcomer hear us now
                        // rather than at the next announce tick.
                        self.send_announcement()?;
                    }
                }
                Wake::Control(Ok(stream)) => self.serve_control(stream).await,
                Wake::Control(Err(err)) => {
                    tracing::warn!(error = %err, "control accept failed");
                }
                Wake::Timer => {
                    if Instant::now() >= deadline {
                        self.run_timers()?;
                        return Ok(dispatched);
                    }
                }
            }
        }
    }

    fn local_node(&self) -> u32 {
        self.shared.node_id.load(Ordering::Acquire)
    }

    fn run_timers(&mut self) -> Result<(), DstcError> {
        let now = Instant::now();
        if now >= self.next_announce {
            self.send_announcement()?;
            self.next_announce = now + self.announce_interval;
        }
        if now >= self.next_expiry {
            let removed = self.shared.peers.expire(self.peer_ttl);
            if removed > 0 {
                tracing::debug!(removed, "expired peer view entries");
            }
            self.next_expiry = now + EXPIRY_CHECK_INTERVAL;
        }
        Ok(())
    }

    fn current_announcement(&self) -> Announcement {
        Announcement {
            node_id: self.local_node(),
            control_port: self.control_port,
            names: self.shared.registry.server_names(),
        }
    }

    fn send_announcement(&self) -> Result<(), DstcError> {
        self.transport.send(self.current_announcement().encode())?;
        Ok(())
    }

    /// One-shot control query: write the announcement blob, hang up.
    async fn serve_control(&self, mut stream: TcpStream) {
        let blob = self.current_announcement().encode();
        let write = async {
            stream.write_all(&blob).await?;
            stream.shutdown().await
        };
        match tokio::time::timeout(CONTROL_WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => tracing::debug!("served control query"),
            Ok(Err(err)) => tracing::debug!(error = %err, "control write failed"),
            Err(_) => tracing::debug!("control client too slow, dropping"),
        }
    }
}

async fn accept_control(listener: &Option<TcpListener>) -> io::Result<TcpStream> {
    match listener {
        Some(listener) => listener.accept().await.map(|(stream, _)| stream),
        None => std::future::pending().await,
    }
}
