//! Socket setup for a connection: TCP connect with timeout and the
//! AUTH / SELECT / READONLY handshake that runs before any queued command is
//! flushed.

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::resp::parser::ProtocolReader;
use crate::resp::types::Reply;
use crate::resp::writer::ProtocolWriter;

/// Default read buffer capacity (64 KB).
pub(crate) const READ_BUF_CAPACITY: usize = 64 * 1024;

/// Open the socket and run the handshake, all within the connect timeout.
pub(crate) async fn establish(
    config: &ConnectionConfig,
    reader: &mut ProtocolReader,
) -> Result<TcpStream> {
    if config.tls {
        return Err(Error::Config(
            "TLS is not supported; use a redis:// URL".into(),
        ));
    }
    let addr = config.primary_addr();
    let timeout = config.connect_timeout();
    let attempt = async {
        let mut stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(true).ok(); // Disable Nagle for low latency
        handshake(&mut stream, config, reader).await?;
        Ok::<_, Error>(stream)
    };
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "connection to {addr} timed out after {timeout:?}"
        ))),
    }
}

/// Commands that initialise a fresh socket.
pub(crate) fn handshake_commands(config: &ConnectionConfig) -> Vec<Command> {
    let mut cmds = Vec::new();
    if let Some(pass) = &config.password {
        let auth = match &config.username {
            Some(user) => Command::new("AUTH").arg(user).arg(pass),
            None => Command::new("AUTH").arg(pass),
        };
        cmds.push(auth);
    }
    if config.db != 0 {
        cmds.push(Command::new("SELECT").arg(config.db));
    }
    if config.read_only {
        cmds.push(Command::new("READONLY"));
    }
    cmds
}

/// Send the handshake commands in one write and check every reply.
async fn handshake(
    stream: &mut TcpStream,
    config: &ConnectionConfig,
    reader: &mut ProtocolReader,
) -> Result<()> {
    let cmds = handshake_commands(config);
    if cmds.is_empty() {
        return Ok(());
    }

    let mut writer = ProtocolWriter::with_capacity(256);
    for cmd in &cmds {
        writer.encode(cmd)?;
    }
    stream.write_all(writer.pending()).await?;

    let mut rbuf = BytesMut::with_capacity(1024);
    for cmd in &cmds {
        match read_reply(stream, &mut rbuf, reader).await? {
            Reply::Error(msg) => {
                return Err(Error::server(msg));
            }
            reply => tracing::trace!(command = cmd.name(), ?reply, "handshake reply"),
        }
    }
    if !rbuf.is_empty() {
        return Err(Error::Protocol("unexpected data after handshake".into()));
    }
    Ok(())
}

/// Read until one complete reply is decoded. Unconsumed bytes stay in `rbuf`.
pub(crate) async fn read_reply(
    stream: &mut TcpStream,
    rbuf: &mut BytesMut,
    reader: &mut ProtocolReader,
) -> Result<Reply> {
    loop {
        if !rbuf.is_empty() {
            let mut chunk = rbuf.split().freeze();
            let decoded = reader.feed(&mut chunk)?;
            if !chunk.is_empty() {
                rbuf.extend_from_slice(&chunk);
            }
            if let Some(reply) = decoded {
                return Ok(reply);
            }
        }

        let n = stream.read_buf(rbuf).await?;
        if n == 0 {
            return Err(Error::Connection(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )));
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
