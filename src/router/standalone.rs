//! Standalone topology router.
//!
//! Routes every command to one server over a single pipelined connection.

use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::resp::types::Reply;
use crate::router::Router;

/// Router for a single server.
#[derive(Debug, Clone)]
pub struct StandaloneRouter {
    conn: Connection,
}

impl StandaloneRouter {
    /// Connect and wait for the handshake.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        Ok(Self {
            conn: Connection::connect(config).await?,
        })
    }

    /// Connect in the background; commands wait until the socket is ready.
    pub fn open(config: ConnectionConfig) -> Self {
        Self {
            conn: Connection::open(config),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Queue a command without waiting for its reply.
    pub fn send(&self, cmd: Command) -> Result<()> {
        self.conn.send(cmd)
    }

    pub async fn quit(&self) -> Result<()> {
        self.conn.quit().await
    }

    pub fn terminate(&self) {
        self.conn.terminate();
    }
}

impl From<Connection> for StandaloneRouter {
    fn from(conn: Connection) -> Self {
        Self { conn }
    }
}

impl Router for StandaloneRouter {
    async fn execute(&self, cmd: Command) -> Result<Reply> {
        self.conn.execute(cmd).await
    }

    async fn pipeline(&self, cmds: Vec<Command>) -> Result<Vec<Reply>> {
        let mut batch = self.conn.batch();
        for cmd in cmds {
            batch.add(cmd);
        }
        batch.run().await
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Mock server that answers each read with the next canned response.
    async fn mock_server_with_responses(responses: Vec<Vec<u8>>) -> ConnectionConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            for response in responses {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                socket.write_all(&response).await.unwrap();
            }
            let _ = socket.read(&mut buf).await;
        });

        ConnectionConfig {
            port,
            ..ConnectionConfig::default()
        }
    }

    #[tokio::test]
    async fn execute_get() {
        let config = mock_server_with_responses(vec![b"$5\r\nhello\r\n".to_vec()]).await;
        let router = StandaloneRouter::connect(config).await.unwrap();
        let reply = router.execute(cmd!("GET", "key")).await.unwrap();
        assert_eq!(reply, Reply::from("hello"));
    }

    #[tokio::test]
    async fn execute_error_reply() {
        let config = mock_server_with_responses(vec![b"-ERR unknown command\r\n".to_vec()]).await;
        let router = StandaloneRouter::connect(config).await.unwrap();
        let err = router.execute(cmd!("NOPE")).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Server(_)));
    }

    #[tokio::test]
    async fn pipeline_keeps_errors_in_place() {
        let config = mock_server_with_responses(vec![b"+OK\r\n-ERR bad\r\n:2\r\n".to_vec()]).await;
        let router = StandaloneRouter::connect(config).await.unwrap();
        let replies = router
            .pipeline(vec![cmd!("SET", "a", 1), cmd!("BAD"), cmd!("INCR", "a")])
            .await
            .unwrap();
        assert_eq!(
            replies,
            vec![
                Reply::Status("OK".into()),
                Reply::Error("ERR bad".into()),
                Reply::Integer(2)
            ]
        );
    }

    #[tokio::test]
    async fn empty_pipeline() {
        let config = mock_server_with_responses(vec![]).await;
        let router = StandaloneRouter::connect(config).await.unwrap();
        assert!(router.pipeline(Vec::new()).await.unwrap().is_empty());
    }
}
