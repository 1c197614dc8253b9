//! Client builder, call API and reader loop.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the client and
//! wrapping a connected stream. The [`Client`] manages the connection:
//! 1. Split the stream into a read half (owned by the reader task) and a
//!    write half (behind the write-serialization lock)
//! 2. Register each call under a fresh sequence number, then write its frame
//! 3. Read frames and route each response to its pending call, or to the
//!    push channel
//! 4. On read failure or `close`, fail every pending call and run the
//!    shutdown hook
//!
//! Lock order is always write lock, then state lock.
//!
//! # Example
//!
//! ```ignore
//! use cluster_rpc::{Client, Kind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder().dial("127.0.0.1:3250").await?;
//!
//!     let reply = client.call(Kind::Call, "Room", "Join", 7, &b"{}"[..]).await?;
//!     println!("joined: {:?}", reply);
//!
//!     while let Some(push) = client.recv_push().await {
//!         println!("push: {:?}", push);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::ToSocketAddrs;
use tokio::sync::{mpsc, watch, Mutex};

use crate::call::{done_channel, Call, CallHandle, Done};
use crate::codec::{is_payload_error, PayloadFormat, ResponseDecoder};
use crate::config::ClientConfig;
use crate::error::{RpcError, Result};
use crate::pending::PendingTable;
use crate::protocol::{Kind, Request, Response};
use crate::transport::connect_tcp;
use crate::writer::FrameWriter;

/// Hook invoked once after the connection has shut down.
pub type ShutdownCallback = Box<dyn FnOnce() + Send + 'static>;

/// Builder for configuring and creating a client.
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new client builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Start from an existing configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Set the push channel capacity.
    ///
    /// Default: 2048
    pub fn push_capacity(mut self, capacity: usize) -> Self {
        self.config.push_capacity = capacity.max(1);
        self
    }

    /// Set the capacity of completion channels allocated by `go`.
    ///
    /// Default: 10
    pub fn done_capacity(mut self, capacity: usize) -> Self {
        self.config.done_capacity = capacity.max(1);
        self
    }

    /// Set the scratch buffer size used for each raw read.
    ///
    /// Default: 8 KiB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(1);
        self
    }

    /// Set the largest payload accepted in either direction.
    ///
    /// Default: 16 MiB
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the payload encoding.
    ///
    /// Default: MsgPack
    pub fn payload_format(mut self, format: PayloadFormat) -> Self {
        self.config.payload_format = format;
        self
    }

    /// Wrap a connected stream and spawn the reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build<S>(self, stream: S) -> Client
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Client::start(stream, self.config)
    }

    /// Connect over TCP and build the client.
    pub async fn dial<A: ToSocketAddrs>(self, addr: A) -> Result<Client> {
        let stream = connect_tcp(addr).await?;
        Ok(self.build(stream))
    }

    /// Connect over a Unix socket and build the client.
    #[cfg(unix)]
    pub async fn dial_unix<P: AsRef<std::path::Path>>(self, path: P) -> Result<Client> {
        let stream = crate::transport::connect_unix(path).await?;
        Ok(self.build(stream))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shutdown hook slot.
#[derive(Default)]
struct ShutdownHook {
    callback: Option<ShutdownCallback>,
    fired: bool,
}

/// State shared between the client handles and the reader task.
struct ClientInner {
    config: ClientConfig,
    /// Write-serialization lock.
    writer: Mutex<FrameWriter>,
    /// State lock: pending table and shutdown flags.
    state: StdMutex<PendingTable>,
    hook: StdMutex<ShutdownHook>,
    /// Flips to `true` when `close` is called. Wakes the reader and aborts
    /// any write in flight.
    close_tx: watch::Sender<bool>,
    push_rx: Mutex<mpsc::Receiver<Response>>,
    /// Flips to `true` once the sweep and hook have run.
    shutdown_tx: watch::Sender<bool>,
    dropped_completions: AtomicU64,
    dropped_pushes: AtomicU64,
}

impl ClientInner {
    fn lock_state(&self) -> MutexGuard<'_, PendingTable> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_hook(&self) -> MutexGuard<'_, ShutdownHook> {
        self.hook.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route one decoded response.
    fn dispatch(&self, response: Response, push_tx: &mpsc::Sender<Response>) {
        if response.kind.is_out_of_band() {
            if let Err(mpsc::error::TrySendError::Full(response)) = push_tx.try_send(response) {
                self.dropped_pushes.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "push channel full, dropping {:?} message (seq {})",
                    response.kind,
                    response.seq
                );
            }
            return;
        }

        let call = self.lock_state().remove(response.seq);
        match call {
            None => {
                // Already failed by a write error, or a stale/duplicate reply
                tracing::debug!("no pending call for response seq {}", response.seq);
            }
            Some(call) if response.is_error() => {
                call.fail(RpcError::Remote(response.error), &self.dropped_completions);
            }
            Some(call) => {
                call.succeed(response.data, &self.dropped_completions);
            }
        }
    }
}

/// A connected RPC client.
///
/// Cheap to clone; all clones share the connection. Any number of tasks may
/// issue calls concurrently. The reader task keeps the connection alive until
/// the peer closes it or [`Client::close`] is called.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Wrap a connected stream with default configuration.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        ClientBuilder::new().build(stream)
    }

    /// Connect over TCP with default configuration.
    pub async fn dial<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        ClientBuilder::new().dial(addr).await
    }

    fn start<S>(stream: S, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);

        let writer = FrameWriter::new(
            Box::pin(write_half),
            config.payload_format,
            config.max_frame_size,
        );
        let decoder =
            ResponseDecoder::with_max_frame_size(config.payload_format, config.max_frame_size);
        let (push_tx, push_rx) = mpsc::channel(config.push_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        let (close_tx, _) = watch::channel(false);

        let inner = Arc::new(ClientInner {
            config,
            writer: Mutex::new(writer),
            state: StdMutex::new(PendingTable::new()),
            hook: StdMutex::new(ShutdownHook::default()),
            close_tx,
            push_rx: Mutex::new(push_rx),
            shutdown_tx,
            dropped_completions: AtomicU64::new(0),
            dropped_pushes: AtomicU64::new(0),
        });

        tokio::spawn(Self::input(inner.clone(), read_half, decoder, push_tx));

        Client { inner }
    }

    /// Invoke `service.method` asynchronously.
    ///
    /// Returns once the request has been written (or has failed); never waits
    /// for the reply. The completed [`Call`] arrives on `done`, or on a fresh
    /// channel owned by the returned handle when `done` is `None`.
    ///
    /// # Errors
    ///
    /// [`RpcError::UnbufferedDone`] if `done` has no buffer space. Every
    /// other failure (shutdown, write error, remote error) is reported on
    /// the call itself.
    pub async fn go(
        &self,
        kind: Kind,
        service: &str,
        method: &str,
        sid: u64,
        done: Option<Done>,
        args: impl Into<Bytes>,
    ) -> Result<CallHandle> {
        let (done, receiver) = match done {
            Some(done) if done.is_unbuffered() => return Err(RpcError::UnbufferedDone),
            Some(done) => (done, None),
            None => {
                let (done, rx) = done_channel(self.inner.config.done_capacity.max(1));
                (done, Some(rx))
            }
        };

        let call = Call::new(format!("{}.{}", service, method), args.into(), sid, done);
        let service_method = call.service_method.clone();
        let seq = self.send(kind, call).await;

        Ok(CallHandle::new(seq, service_method, receiver))
    }

    /// Invoke `service.method` and wait for the reply bytes.
    pub async fn call(
        &self,
        kind: Kind,
        service: &str,
        method: &str,
        sid: u64,
        args: impl Into<Bytes>,
    ) -> Result<Bytes> {
        let (done, mut rx) = done_channel(1);
        self.go(kind, service, method, sid, Some(done), args).await?;

        match rx.recv().await {
            Some(call) => call.into_result(),
            None => Err(RpcError::Shutdown),
        }
    }

    /// Send a fire-and-forget request.
    ///
    /// Consumes a sequence number but never enters the pending table; the
    /// server is not expected to reply.
    pub async fn notify(
        &self,
        service: &str,
        method: &str,
        sid: u64,
        args: impl Into<Bytes>,
    ) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;

        let seq = self
            .inner
            .lock_state()
            .reserve_seq()
            .ok_or(RpcError::Shutdown)?;

        let request = Request {
            seq,
            service_method: format!("{}.{}", service, method),
            args: args.into(),
            kind: Kind::Push,
            sid,
        };
        tokio::select! {
            result = writer.write_request(&request) => result,
            _ = closed(self.inner.close_tx.subscribe()) => Err(RpcError::Shutdown),
        }
    }

    /// Register and write one call. Returns its sequence number if it was
    /// registered.
    async fn send(&self, kind: Kind, call: Call) -> Option<u64> {
        let inner = &self.inner;
        let mut writer = inner.writer.lock().await;

        let mut request = Request {
            seq: 0,
            service_method: call.service_method.clone(),
            args: call.args.clone(),
            kind,
            sid: call.sid,
        };

        let registered = inner.lock_state().register(call);
        let seq = match registered {
            Ok(seq) => seq,
            Err(call) => {
                drop(writer);
                call.fail(RpcError::Shutdown, &inner.dropped_completions);
                return None;
            }
        };

        request.seq = seq;
        // A stalled write must not hold the write lock past `close`
        let written = tokio::select! {
            result = writer.write_request(&request) => result,
            _ = closed(inner.close_tx.subscribe()) => Err(RpcError::Shutdown),
        };
        if let Err(err) = written {
            let call = inner.lock_state().remove(seq);
            drop(writer);
            if let Some(call) = call {
                tracing::debug!("write failed for {} (seq {}): {}", call.service_method, seq, err);
                call.fail(err, &inner.dropped_completions);
            }
        }

        Some(seq)
    }

    /// Close the connection.
    ///
    /// Pending calls fail with [`RpcError::Shutdown`] once the reader has
    /// observed the close. A request whose write is still in flight is
    /// abandoned and fails with [`RpcError::Shutdown`] as well.
    ///
    /// # Errors
    ///
    /// [`RpcError::Shutdown`] if `close` was already called, or the I/O
    /// error from shutting down the write side.
    pub async fn close(&self) -> Result<()> {
        if !self.inner.lock_state().begin_close() {
            return Err(RpcError::Shutdown);
        }

        self.inner.close_tx.send_replace(true);

        let mut writer = self.inner.writer.lock().await;
        writer.shutdown().await
    }

    /// Register the hook to run once after shutdown.
    ///
    /// Replaces any earlier hook. If the connection has already shut down,
    /// the hook runs immediately on the calling task.
    pub fn on_shutdown<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hook = self.inner.lock_hook();
        if hook.fired {
            drop(hook);
            callback();
            return;
        }
        hook.callback = Some(Box::new(callback));
    }

    /// Wait until the connection has shut down and the hook has run.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.inner.shutdown_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Receive the next push or out-of-band response.
    ///
    /// Returns `None` once the connection has shut down and every buffered
    /// message has been taken.
    pub async fn recv_push(&self) -> Option<Response> {
        self.inner.push_rx.lock().await.recv().await
    }

    /// Take a buffered push without waiting.
    ///
    /// Returns `None` while another task is parked in
    /// [`Client::recv_push`], since that task holds the receiver; the push it
    /// is waiting for goes to it.
    pub fn try_recv_push(&self) -> Option<Response> {
        self.inner.push_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Number of calls waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_state().len()
    }

    /// Completions dropped because their done channel was full.
    pub fn dropped_completions(&self) -> u64 {
        self.inner.dropped_completions.load(Ordering::Relaxed)
    }

    /// Pushes dropped because the push channel was full.
    pub fn dropped_pushes(&self) -> u64 {
        self.inner.dropped_pushes.load(Ordering::Relaxed)
    }

    /// Whether `close` has been called.
    pub fn is_closing(&self) -> bool {
        self.inner.lock_state().is_closing()
    }

    /// Whether the connection has shut down.
    pub fn is_shutdown(&self) -> bool {
        self.inner.lock_state().is_shutdown()
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Reader task: read until the stream ends, then sweep.
    async fn input<R>(
        inner: Arc<ClientInner>,
        reader: R,
        mut decoder: ResponseDecoder,
        push_tx: mpsc::Sender<Response>,
    ) where
        R: AsyncRead + Unpin,
    {
        let result = Self::read_loop(&inner, reader, &mut decoder, &push_tx).await;
        drop(push_tx);
        Self::terminate(&inner, result).await;
    }

    /// Main read loop - feeds raw reads to the decoder and dispatches every
    /// complete response.
    ///
    /// `Ok(())` means a clean end of stream (EOF or `close`).
    async fn read_loop<R>(
        inner: &ClientInner,
        mut reader: R,
        decoder: &mut ResponseDecoder,
        push_tx: &mpsc::Sender<Response>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; inner.config.read_buffer_size.max(1)];

        loop {
            let n = tokio::select! {
                _ = closed(inner.close_tx.subscribe()) => return Ok(()),
                read = reader.read(&mut buf) => match read {
                    Ok(0) => return Ok(()),
                    Ok(n) => n,
                    Err(e) => return Err(e.into()),
                },
            };

            decoder.extend(&buf[..n]);

            loop {
                match decoder.read_response() {
                    Ok(response) => inner.dispatch(response, push_tx),
                    Err(e) if e.is_incomplete() => break,
                    Err(e) if is_payload_error(&e) => {
                        tracing::warn!("skipping undecodable response frame: {}", e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Shutdown sweep: fail every pending call, then run the hook.
    async fn terminate(inner: &ClientInner, result: Result<()>) {
        let writer = inner.writer.lock().await;
        let (calls, closing) = {
            let mut state = inner.lock_state();
            (state.shut_down(), state.is_closing())
        };
        drop(writer);

        let err = match result {
            Ok(()) if closing => RpcError::Shutdown,
            Ok(()) => RpcError::UnexpectedEof,
            Err(e) => e,
        };

        if closing {
            tracing::debug!("connection closed, failing {} pending calls", calls.len());
        } else {
            tracing::error!("client protocol error: {}", err);
        }

        for call in calls {
            call.fail(err.clone(), &inner.dropped_completions);
        }

        let callback = {
            let mut hook = inner.lock_hook();
            hook.fired = true;
            hook.callback.take()
        };
        if let Some(callback) = callback {
            callback();
        }

        inner.shutdown_tx.send_replace(true);
    }
}

/// Resolves once `close` has been called.
async fn closed(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}
