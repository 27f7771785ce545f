//! Connection behaviour over a real socket: ordering, corking, reconnects.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::*;
use respline::{cmd, Connection, ConnectionConfig, ConnectionState, Error, Reply};

#[tokio::test]
async fn replies_stay_in_order_when_dribbled() {
    let server = MockServer::start(|args: &[Bytes]| {
        Action::Dribble(Reply::Bulk(args[1].clone()).to_wire().to_vec())
    })
    .await;
    let conn = Connection::connect(server.config()).await.unwrap();

    let pending: Vec<_> = (0..50).map(|i| conn.execute(cmd!("ECHO", i))).collect();
    for (i, reply) in pending.into_iter().enumerate().rev() {
        assert_eq!(reply.await.unwrap(), Reply::from(i.to_string().as_str()));
    }
}

#[tokio::test]
async fn commands_issued_together_share_a_write() {
    let server = MockServer::start(store()).await;
    let conn = Connection::connect(server.config()).await.unwrap();

    let pending: Vec<_> = (0..100).map(|_| conn.execute(cmd!("INCR", "n"))).collect();
    let mut last = 0;
    for reply in pending {
        last = reply.await.unwrap().as_int().unwrap();
    }
    assert_eq!(last, 100);
    assert_eq!(server.count("INCR"), 100);
    // One socket read would be ideal; allow the kernel to split it.
    assert!(server.reads() <= 4, "{} reads", server.reads());
}

#[tokio::test]
async fn large_bulk_reply() {
    let server = MockServer::start(store()).await;
    let conn = Connection::connect(server.config()).await.unwrap();
    let payload = "x".repeat(256 * 1024);

    let reply = conn.execute(cmd!("ECHO", payload.as_str())).await.unwrap();
    assert_eq!(reply.as_bytes().unwrap().len(), payload.len());
    assert_eq!(reply, Reply::from(payload.as_str()));
}

#[tokio::test]
async fn reconnects_after_drop() {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&dropped);
    let server = MockServer::start(move |args: &[Bytes]| {
        if name(args) == "BLPOP" && !flag.swap(true, Ordering::SeqCst) {
            return Action::Close;
        }
        ok()
    })
    .await;
    let mut config = server.config();
    config.password = Some("secret".into());
    let conn = Connection::connect(config).await.unwrap();

    let err = conn.execute(cmd!("BLPOP", "q", 0)).await.unwrap_err();
    assert!(matches!(err, Error::Disconnected(_)), "{err:?}");

    assert_eq!(
        conn.execute(cmd!("SET", "k", "v")).await.unwrap(),
        Reply::Status("OK".into())
    );
    assert_eq!(server.connections(), 2);
    assert_eq!(server.count("AUTH"), 2);
}

#[tokio::test]
async fn no_reconnect_when_disabled() {
    let server = MockServer::start(|_: &[Bytes]| Action::Close).await;
    let mut config = server.config();
    config.auto_reconnect = false;
    let conn = Connection::connect(config).await.unwrap();

    assert!(conn.execute(cmd!("PING")).await.is_err());
    conn.closed().await.ok();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(
        conn.execute(cmd!("PING")).await,
        Err(Error::Closed) | Err(Error::Disconnected(_))
    ));
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn quit_waits_for_outstanding_replies() {
    let server = MockServer::start(store()).await;
    let conn = Connection::connect(server.config()).await.unwrap();

    let set = conn.execute(cmd!("SET", "k", "v"));
    let get = conn.execute(cmd!("GET", "k"));
    conn.quit().await.unwrap();

    assert_eq!(set.await.unwrap(), Reply::Status("OK".into()));
    assert_eq!(get.await.unwrap(), Reply::from("v"));
    assert_eq!(server.names(), vec!["SET", "GET", "QUIT"]);
    assert!(matches!(conn.execute(cmd!("PING")).await, Err(Error::Closed)));
}

#[tokio::test]
async fn open_holds_commands_until_connected() {
    let server = MockServer::start(store()).await;
    let conn = Connection::open(server.config());

    let first = conn.execute(cmd!("RPUSH", "l", "a"));
    let second = conn.execute(cmd!("RPUSH", "l", "b"));
    assert_eq!(first.await.unwrap(), Reply::Integer(1));
    assert_eq!(second.await.unwrap(), Reply::Integer(2));
    assert_eq!(conn.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn malformed_reply_closes_for_good() {
    let server = MockServer::start(|_: &[Bytes]| Action::Raw(b"?bogus\r\n".to_vec())).await;
    let conn = Connection::connect(server.config()).await.unwrap();

    let err = conn.execute(cmd!("PING")).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "{err:?}");
    assert!(!err.is_transport());
    assert!(matches!(conn.closed().await, Err(Error::Protocol(_))));
    assert!(matches!(conn.execute(cmd!("PING")).await, Err(Error::Protocol(_))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn reply_without_pending_command_is_fatal() {
    let server = MockServer::start(|_: &[Bytes]| Action::Raw(b"+OK\r\n+EXTRA\r\n".to_vec())).await;
    let conn = Connection::connect(server.config()).await.unwrap();

    assert_eq!(
        conn.execute(cmd!("PING")).await.unwrap(),
        Reply::Status("OK".into())
    );
    let closed = conn.closed().await.unwrap_err();
    assert!(
        matches!(&closed, Error::Protocol(msg) if msg.contains("no pending command")),
        "{closed:?}"
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn reconnect_gives_up_after_max_attempts() {
    let (listener, port) = MockServer::bind().await;
    let config = ConnectionConfig {
        port,
        reconnect_delay_ms: 10,
        max_reconnect_attempts: 3,
        ..ConnectionConfig::default()
    };
    // Accept once, then stay down.
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        drop(listener);
        drop(socket);
    });
    let conn = Connection::connect(config).await.unwrap();
    server.await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(5), conn.closed())
        .await
        .unwrap();
    assert!(
        matches!(&closed, Err(Error::Disconnected(msg)) if msg.contains("after 3 attempts")),
        "{closed:?}"
    );
    assert_eq!(conn.state(), ConnectionState::Closed);
}
