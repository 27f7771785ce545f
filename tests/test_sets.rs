//! Integration tests: set commands.

mod common;

use std::collections::HashSet;

use bytes::Bytes;
use common::*;

#[tokio::test]
async fn sadd_counts_new_members() {
    let (_server, c) = client().await;

    assert_eq!(c.sadd("s", ["a", "b"]).await.unwrap(), 2);
    assert_eq!(c.sadd("s", ["b", "c"]).await.unwrap(), 1);
}

#[tokio::test]
async fn smembers() {
    let (_server, c) = client().await;

    c.sadd("s", ["x", "y", "x"]).await.unwrap();
    let members: HashSet<Bytes> = c.smembers("s").await.unwrap().into_iter().collect();
    assert_eq!(
        members,
        HashSet::from([Bytes::from_static(b"x"), Bytes::from_static(b"y")])
    );
    assert!(c.smembers("noset").await.unwrap().is_empty());
}
