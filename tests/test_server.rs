//! Integration tests: server commands and connection setup.

mod common;

use bytes::Bytes;
use common::*;
use respline::{Client, Error, Reply};

#[tokio::test]
async fn ping() {
    let (_server, c) = client().await;
    assert!(c.ping().await.unwrap());
}

#[tokio::test]
async fn echo() {
    let (_server, c) = client().await;
    assert_eq!(c.echo("hi there").await.unwrap(), Bytes::from_static(b"hi there"));
}

#[tokio::test]
async fn dbsize_and_flushdb() {
    let (_server, c) = client().await;

    c.set("a", 1).await.unwrap();
    c.set("b", 2).await.unwrap();
    assert_eq!(c.dbsize().await.unwrap(), 2);
    c.flushdb().await.unwrap();
    assert_eq!(c.dbsize().await.unwrap(), 0);
}

#[tokio::test]
async fn publish_without_subscribers() {
    let (_server, c) = client().await;
    assert_eq!(c.publish("news", "hello").await.unwrap(), 0);
}

#[tokio::test]
async fn invoke_unknown_command() {
    let (_server, c) = client().await;

    let err = c.invoke("NOSUCHCMD", ["x"]).await.unwrap_err();
    assert!(matches!(err, Error::Server(_)), "{err:?}");
    // The connection is still usable.
    assert_eq!(
        c.invoke("ECHO", ["ok"]).await.unwrap(),
        Reply::from("ok")
    );
}

#[tokio::test]
async fn url_with_password_and_db_handshakes() {
    let server = MockServer::start(store()).await;
    let url = format!("redis://:secret@127.0.0.1:{}/2", server.port);
    let c = Client::from_url(&url).await.unwrap();

    assert!(c.ping().await.unwrap());
    assert_eq!(
        server.commands()[..2],
        [vec!["AUTH", "secret"], vec!["SELECT", "2"]]
    );
}

#[tokio::test]
async fn unset_argument_is_rejected_locally() {
    let (server, c) = client().await;

    let err = c.set("k", None::<&str>).await.unwrap_err();
    assert!(matches!(err, Error::Usage(_)), "{err:?}");
    assert!(c.ping().await.unwrap());
    assert_eq!(server.names(), vec!["PING"]);
}
