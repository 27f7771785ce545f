//! The task that owns a connection's socket.
//!
//! One driver runs per [`Connection`](super::Connection). It owns the
//! socket, the [`ProtocolReader`], the [`ProtocolWriter`] and the queue of
//! commands awaiting replies; handles only talk to it through a channel, so
//! none of that state is ever touched from two places.
//!
//! Each session is one `select!` loop:
//!
//! 1. **write**: while the writer holds unflushed bytes, offer them to the
//!    socket; a short write leaves the rest for the next turn.
//! 2. **read**: decode every complete reply in the chunk and complete the
//!    oldest pending entry with it.
//! 3. **submit**: only when nothing is unflushed: take one request, then
//!    everything else already queued (the cork), and encode it all so the
//!    next turn flushes it in a single write.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::tcp::{self, READ_BUF_CAPACITY};
use super::{ConnectionState, Fatal, Shared};
use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result, ServerError};
use crate::queue::CommandQueue;
use crate::resp::parser::ProtocolReader;
use crate::resp::types::Reply;
use crate::resp::writer::ProtocolWriter;

/// Requests taken per cork before flushing.
const MAX_CORK: usize = 1024;

pub(crate) type ReplySender = oneshot::Sender<Result<Reply>>;

/// A command bound to the reply it expects.
#[derive(Debug)]
pub(crate) struct Pending {
    pub cmd: Command,
    pub reply: Option<ReplySender>,
}

impl Pending {
    pub fn new(cmd: Command, reply: Option<ReplySender>) -> Self {
        Self { cmd, reply }
    }

    fn fail(self, err: Error) {
        if let Some(tx) = self.reply {
            let _ = tx.send(Err(err));
        }
    }
}

#[derive(Debug)]
pub(crate) enum Request {
    One(Pending),
    Batch(CommandQueue<Pending>),
    Quit(Pending),
}

impl Request {
    fn fail(self, err: impl Fn() -> Error) {
        match self {
            Self::One(p) | Self::Quit(p) => p.fail(err()),
            Self::Batch(q) => q.into_iter().for_each(|p| p.fail(err())),
        }
    }
}

/// Why a session ended.
enum SessionEnd {
    /// QUIT answered or the server closed after it.
    Quit,
    /// `terminate()` or every handle dropped.
    Terminated,
    /// The socket failed; reconnect policy applies.
    Lost(Error),
    /// Protocol violation or unhandled error reply; no reconnect.
    Fatal(Fatal),
}

pub(crate) struct Driver {
    config: ConnectionConfig,
    addr: String,
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<Request>,
    ready: Option<oneshot::Sender<Result<()>>>,
    reader: ProtocolReader,
    writer: ProtocolWriter,
    /// Sent (or encoded), awaiting a reply, oldest first.
    pending: CommandQueue<Pending>,
    quitting: bool,
    handles_gone: bool,
}

impl Driver {
    pub fn new(
        config: ConnectionConfig,
        shared: Arc<Shared>,
        rx: mpsc::UnboundedReceiver<Request>,
        ready: Option<oneshot::Sender<Result<()>>>,
    ) -> Self {
        Self {
            addr: config.primary_addr(),
            reader: ProtocolReader::new(config.max_buffer_size),
            writer: ProtocolWriter::default(),
            pending: CommandQueue::new(),
            quitting: false,
            handles_gone: false,
            config,
            shared,
            rx,
            ready,
        }
    }

    pub async fn run(mut self) {
        let mut ever_ready = false;
        let mut attempts = 0u32;

        loop {
            if self.shared.is_terminated() {
                break;
            }
            self.shared.set_state(ConnectionState::Connecting);
            let established = tokio::select! {
                biased;
                _ = self.shared.terminate.notified() => break,
                res = tcp::establish(&self.config, &mut self.reader) => res,
            };

            match established {
                Ok(mut stream) => {
                    attempts = 0;
                    ever_ready = true;
                    debug!(addr = %self.addr, "connected");
                    self.shared.set_state(ConnectionState::Ready);
                    if let Some(tx) = self.ready.take() {
                        let _ = tx.send(Ok(()));
                    }

                    let end = self.session(&mut stream).await;
                    self.writer.reset();
                    self.reader.reset();

                    match end {
                        SessionEnd::Quit | SessionEnd::Terminated => {
                            self.fail_pending(|| Error::Closed);
                            break;
                        }
                        SessionEnd::Fatal(fatal) => {
                            error!(addr = %self.addr, error = %fatal, "closing connection");
                            self.fail_pending(|| fatal.pending_error());
                            self.shared.set_fatal(fatal);
                            break;
                        }
                        SessionEnd::Lost(err) => {
                            let msg = err.to_string();
                            warn!(addr = %self.addr, error = %msg, pending = self.pending.len(), "connection lost");
                            self.fail_pending(|| Error::Disconnected(msg.clone()));
                            if self.quitting {
                                break;
                            }
                            if !self.config.auto_reconnect {
                                self.shared.set_fatal(Fatal::Other(msg));
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    self.reader.reset();
                    if !ever_ready {
                        debug!(addr = %self.addr, error = %err, "connect failed");
                        self.shared.set_fatal(Fatal::Other(format!("connect failed: {err}")));
                        if let Some(tx) = self.ready.take() {
                            let _ = tx.send(Err(err));
                        }
                        break;
                    }
                    attempts += 1;
                    warn!(addr = %self.addr, attempt = attempts, error = %err, "reconnect failed");
                    let max = self.config.max_reconnect_attempts;
                    if max > 0 && attempts >= max {
                        self.shared.set_fatal(Fatal::Other(format!(
                            "gave up reconnecting after {attempts} attempts: {err}"
                        )));
                        break;
                    }
                }
            }

            if self.handles_gone {
                break;
            }
            self.shared.set_state(ConnectionState::Disconnected);
            tokio::select! {
                biased;
                _ = self.shared.terminate.notified() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
            }
            debug!(addr = %self.addr, "reconnecting");
        }

        self.shutdown();
    }

    /// Fail everything still queued and mark the connection closed.
    fn shutdown(&mut self) {
        self.rx.close();
        let shared = Arc::clone(&self.shared);
        let closed = move || shared.closed_error();
        self.fail_pending(&closed);
        while let Ok(req) = self.rx.try_recv() {
            req.fail(&closed);
        }
        self.shared.set_state(ConnectionState::Closed);
        debug!(addr = %self.addr, "connection closed");
    }

    fn fail_pending(&mut self, err: impl Fn() -> Error) {
        for p in self.pending.drain() {
            p.fail(err());
        }
    }

    async fn session(&mut self, stream: &mut TcpStream) -> SessionEnd {
        let (mut rd, mut wr) = stream.split();
        let mut rbuf = BytesMut::with_capacity(READ_BUF_CAPACITY);

        loop {
            if self.shared.is_terminated() {
                return SessionEnd::Terminated;
            }
            if self.pending.is_empty() && !self.writer.has_pending() {
                if self.quitting {
                    return SessionEnd::Quit;
                }
                if self.handles_gone {
                    return SessionEnd::Terminated;
                }
            }
            if rbuf.capacity() - rbuf.len() < 4096 {
                rbuf.reserve(READ_BUF_CAPACITY);
            }

            tokio::select! {
                biased;

                _ = self.shared.terminate.notified() => return SessionEnd::Terminated,

                res = wr.write(self.writer.pending()), if self.writer.has_pending() => match res {
                    Ok(0) => {
                        return SessionEnd::Lost(Error::Connection(std::io::ErrorKind::WriteZero.into()))
                    }
                    Ok(n) => self.writer.consume(n),
                    Err(e) => return SessionEnd::Lost(e.into()),
                },

                res = rd.read_buf(&mut rbuf) => match res {
                    Ok(0) if self.quitting => return SessionEnd::Quit,
                    Ok(0) => {
                        return SessionEnd::Lost(Error::Disconnected(
                            "connection closed by server".into(),
                        ))
                    }
                    Ok(_) => {
                        let mut chunk = rbuf.split().freeze();
                        if let Err(end) = self.deliver(&mut chunk) {
                            return end;
                        }
                    }
                    Err(e) => return SessionEnd::Lost(e.into()),
                },

                req = self.rx.recv(), if !self.writer.has_pending() && !self.quitting && !self.handles_gone => match req {
                    Some(req) => {
                        self.accept(req);
                        let mut taken = 1;
                        while taken < MAX_CORK && !self.quitting {
                            let Ok(req) = self.rx.try_recv() else { break };
                            self.accept(req);
                            taken += 1;
                        }
                    }
                    None => self.handles_gone = true,
                },
            }
        }
    }

    /// Encode a request and queue its entries for replies.
    fn accept(&mut self, req: Request) {
        match req {
            Request::One(p) => self.enqueue(p),
            Request::Quit(p) => {
                self.quitting = true;
                self.shared.set_state(ConnectionState::Closing);
                self.enqueue(p);
            }
            Request::Batch(mut batch) => {
                let mut encoded = CommandQueue::new();
                for p in batch.drain() {
                    match self.writer.encode(&p.cmd) {
                        Ok(()) => encoded.push_back(p),
                        Err(e) => p.fail(e),
                    }
                }
                self.pending.splice_all(&mut encoded);
            }
        }
    }

    fn enqueue(&mut self, p: Pending) {
        match self.writer.encode(&p.cmd) {
            Ok(()) => self.pending.push_back(p),
            Err(e) => p.fail(e),
        }
    }

    /// Decode every reply in `chunk` and complete pending entries in order.
    fn deliver(&mut self, chunk: &mut Bytes) -> std::result::Result<(), SessionEnd> {
        loop {
            let reply = match self.reader.feed(chunk) {
                Ok(Some(reply)) => reply,
                Ok(None) => return Ok(()),
                Err(Error::Protocol(msg)) => return Err(SessionEnd::Fatal(Fatal::Protocol(msg))),
                Err(e) => return Err(SessionEnd::Fatal(Fatal::Protocol(e.to_string()))),
            };
            let Some(entry) = self.pending.pop_front() else {
                return Err(SessionEnd::Fatal(Fatal::Protocol(format!(
                    "reply with no pending command ({})",
                    reply.type_name()
                ))));
            };
            match (entry.reply, reply) {
                (Some(tx), reply) => {
                    let _ = tx.send(reply.into_result());
                }
                (None, Reply::Error(msg)) => {
                    error!(
                        addr = %self.addr,
                        command = entry.cmd.name(),
                        error = %msg,
                        "error reply to a command sent without a handler"
                    );
                    return Err(SessionEnd::Fatal(Fatal::Unhandled(ServerError::new(msg))));
                }
                (None, _) => {}
            }
        }
    }
}
