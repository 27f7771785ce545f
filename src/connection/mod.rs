//! Pipelined connection to one server.
//!
//! A [`Connection`] is a cheap, cloneable handle. Submitting a command puts
//! it on a channel and returns immediately; the driver task (see
//! [`driver`]) writes it, matches the reply by position and completes the
//! caller's future. The k-th reply on a socket always completes the k-th
//! command written to it.
//!
//! The same `Connection` survives reconnects. Commands still awaiting a
//! reply when the socket drops fail with [`Error::Disconnected`]; commands
//! submitted while reconnecting wait in the channel and go out once the new
//! socket is ready.

mod driver;
mod tcp;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, Notify};

use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result, ServerError};
use crate::queue::CommandQueue;
use crate::resp::types::Reply;

use driver::{Driver, Pending, Request};

pub(crate) use tcp::handshake_commands;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    /// QUIT sent, waiting for the server to close.
    Closing,
    /// Terminal; nothing more will be sent.
    Closed,
}

/// What killed a connection for good.
#[derive(Debug, Clone)]
pub(crate) enum Fatal {
    /// An error reply arrived for a command sent without a handler.
    Unhandled(ServerError),
    /// The reply stream could not be decoded or matched to a command.
    Protocol(String),
    Other(String),
}

impl Fatal {
    fn to_error(&self) -> Error {
        match self {
            Self::Unhandled(e) => Error::Unhandled(e.clone()),
            Self::Protocol(msg) => Error::Protocol(msg.clone()),
            Self::Other(msg) => Error::Disconnected(msg.clone()),
        }
    }

    /// The error handed to commands still waiting when the connection died.
    fn pending_error(&self) -> Error {
        match self {
            Self::Protocol(msg) => Error::Protocol(msg.clone()),
            other => Error::Disconnected(other.to_string()),
        }
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unhandled(e) => write!(f, "unhandled server error: {e}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

/// State visible to both the handles and the driver.
pub(crate) struct Shared {
    addr: String,
    read_only: bool,
    state: watch::Sender<ConnectionState>,
    fatal: Mutex<Option<Fatal>>,
    terminate: Notify,
    terminated: AtomicBool,
}

impl Shared {
    fn new(config: &ConnectionConfig) -> Self {
        Self {
            addr: config.primary_addr(),
            read_only: config.read_only,
            state: watch::Sender::new(ConnectionState::Disconnected),
            fatal: Mutex::new(None),
            terminate: Notify::new(),
            terminated: AtomicBool::new(false),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn set_fatal(&self, fatal: Fatal) {
        *self.fatal.lock() = Some(fatal);
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// The error handed to callers once the driver is gone.
    fn closed_error(&self) -> Error {
        match &*self.fatal.lock() {
            Some(fatal) => fatal.to_error(),
            None => Error::Closed,
        }
    }
}

/// Reject commands that cannot be encoded before they reach the driver.
pub(crate) fn check_args(cmd: &Command) -> Result<()> {
    match cmd.first_unset() {
        Some(i) => Err(Error::Usage(format!(
            "{}: argument {} is unset",
            cmd.name(),
            i + 1
        ))),
        None => Ok(()),
    }
}

/// Handle to one server connection. Clones share the same socket.
#[derive(Clone)]
pub struct Connection {
    tx: mpsc::UnboundedSender<Request>,
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.shared.addr)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Connect and wait until the socket is ready (handshake included).
    ///
    /// A failure here is returned as-is and the connection is not retried.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let conn = Self::spawn(config, Some(ready_tx));
        match ready_rx.await {
            Ok(Ok(())) => Ok(conn),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(conn.shared.closed_error()),
        }
    }

    /// Start connecting in the background and return at once. Commands
    /// submitted before the socket is ready are held and sent in order.
    ///
    /// Must be called within a tokio runtime.
    pub fn open(config: ConnectionConfig) -> Self {
        Self::spawn(config, None)
    }

    fn spawn(config: ConnectionConfig, ready: Option<oneshot::Sender<Result<()>>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(&config));
        tokio::spawn(Driver::new(config, Arc::clone(&shared), rx, ready).run());
        Self { tx, shared }
    }

    /// "host:port" this connection talks to.
    pub fn addr(&self) -> &str {
        &self.shared.addr
    }

    /// Whether READONLY is sent after each connect.
    pub fn is_read_only(&self) -> bool {
        self.shared.read_only
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Whether both handles drive the same socket.
    pub fn same(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Queue a command and return a future for its reply.
    ///
    /// The command is queued before this returns, so commands issued in
    /// sequence are written in that order even if their futures are awaited
    /// out of order. An error reply resolves to [`Error::Server`].
    pub fn execute(&self, cmd: Command) -> impl Future<Output = Result<Reply>> + Send + 'static {
        let submitted = self.submit(cmd);
        let shared = Arc::clone(&self.shared);
        async move {
            let rx = submitted?;
            rx.await.unwrap_or_else(|_| Err(shared.closed_error()))
        }
    }

    fn submit(&self, cmd: Command) -> Result<oneshot::Receiver<Result<Reply>>> {
        check_args(&cmd)?;
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Request::One(Pending::new(cmd, Some(tx))))
            .map_err(|_| self.shared.closed_error())?;
        Ok(rx)
    }

    /// Queue a command without waiting for its reply.
    ///
    /// An error reply to it closes the connection: it is logged, pending
    /// commands fail, and [`closed`](Self::closed) reports it.
    pub fn send(&self, cmd: Command) -> Result<()> {
        check_args(&cmd)?;
        self.tx
            .send(Request::One(Pending::new(cmd, None)))
            .map_err(|_| self.shared.closed_error())
    }

    /// Stage commands to be written together.
    pub fn batch(&self) -> Batch {
        Batch {
            conn: self.clone(),
            queue: CommandQueue::new(),
            replies: Vec::new(),
            invalid: None,
        }
    }

    /// Send QUIT, stop reconnecting and wait for the socket to close.
    pub async fn quit(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let quit = Request::Quit(Pending::new(Command::new("QUIT"), Some(tx)));
        if self.tx.send(quit).is_err() {
            return Ok(());
        }
        match rx.await {
            Ok(Err(e)) if !e.is_transport() => return Err(e),
            _ => {}
        }
        self.closed().await
    }

    /// Close the socket now without waiting for replies. Pending commands
    /// fail with [`Error::Closed`].
    pub fn terminate(&self) {
        self.shared.terminated.store(true, Ordering::Release);
        self.shared.terminate.notify_one();
    }

    /// Wait until the connection is closed for good.
    ///
    /// Returns the fatal error when it did not close through
    /// [`quit`](Self::quit) or [`terminate`](Self::terminate).
    pub async fn closed(&self) -> Result<()> {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
        match &*self.shared.fatal.lock() {
            Some(fatal) => Err(fatal.to_error()),
            None => Ok(()),
        }
    }
}

/// Commands staged for one write.
///
/// The whole batch reaches the connection as a single queue, is spliced onto
/// its pending list at once, and goes out in one flush.
pub struct Batch {
    conn: Connection,
    queue: CommandQueue<Pending>,
    replies: Vec<oneshot::Receiver<Result<Reply>>>,
    invalid: Option<Error>,
}

impl Batch {
    pub fn add(&mut self, cmd: Command) -> &mut Self {
        if let Err(e) = check_args(&cmd) {
            self.invalid.get_or_insert(e);
            return self;
        }
        let (tx, rx) = oneshot::channel();
        self.queue.push_back(Pending::new(cmd, Some(tx)));
        self.replies.push(rx);
        self
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn dispatch(conn: &Connection, queue: CommandQueue<Pending>) -> Result<()> {
        conn.tx
            .send(Request::Batch(queue))
            .map_err(|_| conn.shared.closed_error())
    }

    /// Send everything and collect one reply per command, in order.
    ///
    /// Error replies stay in place as [`Reply::Error`]; only a transport
    /// failure fails the whole batch.
    pub async fn run(self) -> Result<Vec<Reply>> {
        let Self {
            conn,
            queue,
            replies,
            invalid,
        } = self;
        if let Some(e) = invalid {
            return Err(e);
        }
        if queue.is_empty() {
            return Ok(Vec::new());
        }
        Self::dispatch(&conn, queue)?;

        let mut out = Vec::with_capacity(replies.len());
        for rx in replies {
            out.push(match rx.await {
                Ok(Ok(reply)) => reply,
                Ok(Err(Error::Server(e))) => Reply::Error(e.message),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(conn.shared.closed_error()),
            });
        }
        Ok(out)
    }

    /// Wrap the staged commands in MULTI/EXEC.
    ///
    /// Returns EXEC's results, or `None` when the server aborted the
    /// transaction because a watched key changed.
    pub async fn transaction(self) -> Result<Option<Vec<Reply>>> {
        let Self {
            conn,
            mut queue,
            replies,
            invalid,
        } = self;
        if let Some(e) = invalid {
            return Err(e);
        }

        let (multi_tx, multi_rx) = oneshot::channel();
        let mut head = CommandQueue::new();
        head.push_back(Pending::new(Command::new("MULTI"), Some(multi_tx)));
        queue.splice_all_front(&mut head);
        let (exec_tx, exec_rx) = oneshot::channel();
        queue.push_back(Pending::new(Command::new("EXEC"), Some(exec_tx)));
        Self::dispatch(&conn, queue)?;

        let closed = || conn.shared.closed_error();
        multi_rx.await.unwrap_or_else(|_| Err(closed()))?;

        // Replies here are QUEUED; an error means EXEC will abort.
        let mut queue_error = None;
        for rx in replies {
            if let Err(e) = rx.await.unwrap_or_else(|_| Err(closed())) {
                if e.is_transport() {
                    return Err(e);
                }
                queue_error.get_or_insert(e);
            }
        }

        match exec_rx.await.unwrap_or_else(|_| Err(closed())) {
            Ok(Reply::Array(items)) => Ok(Some(items)),
            Ok(Reply::Null | Reply::NullArray) => Ok(None),
            Ok(other) => Err(Error::Type(format!(
                "EXEC: expected array, got {}",
                other.type_name()
            ))),
            Err(e) => Err(queue_error.unwrap_or(e)),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
