use super::{BodyFraming, OriginConnection};
use crate::common::{capture_downstream, refused_addr, spawn_origin, spawn_scripted_origin};
use crate::relay::RelayConfig;
use crate::request::RequestSpec;
use crate::responder::Responder;
use crate::RelayError;
use std::net::SocketAddr;

fn request(addr: SocketAddr, path: &str) -> RequestSpec {
    RequestSpec::get(&format!("http://{addr}{path}")).unwrap()
}

async fn fetch(mut request: RequestSpec) -> crate::Result<super::OriginResponse> {
    let config = RelayConfig::default();
    let mut connection = OriginConnection::connect(&request, &config).await?;
    connection.send(&mut request).await?;
    connection.receive_head(&request).await
}

#[tokio::test]
async fn test_relay_body_across_read_ahead_boundary() {
    let (origin, addr) = spawn_scripted_origin(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhel".to_vec(),
        b"lo ".to_vec(),
        b"world".to_vec(),
    ])
    .await
    .unwrap();

    let mut response = fetch(request(addr, "/split")).await.unwrap();
    assert_eq!(response.framing(), BodyFraming::Length(11));

    let (downstream, received) = capture_downstream();
    let mut responder = Responder::new(downstream);
    let relayed = response.relay_body(&mut responder).await.unwrap();
    responder.close().await;

    assert_eq!(relayed, 11);
    assert_eq!(received.await.unwrap(), b"hello world");

    let sent = String::from_utf8(origin.await.unwrap()).unwrap();
    assert!(sent.starts_with("GET /split HTTP/1.1\r\n"));
    assert!(sent.contains("connection: close\r\n"));
}

#[tokio::test]
async fn test_relay_body_until_close() {
    let (_origin, addr) = spawn_scripted_origin(vec![
        b"HTTP/1.1 200 OK\r\n\r\nfirst-".to_vec(),
        b"second".to_vec(),
    ])
    .await
    .unwrap();

    let mut response = fetch(request(addr, "/")).await.unwrap();
    assert_eq!(response.framing(), BodyFraming::UntilClose);

    let (downstream, received) = capture_downstream();
    let mut responder = Responder::new(downstream);
    response.relay_body(&mut responder).await.unwrap();
    responder.close().await;

    assert_eq!(received.await.unwrap(), b"first-second");
}

#[tokio::test]
async fn test_read_body_only_once() {
    let (_origin, addr) = spawn_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
        .await
        .unwrap();

    let mut response = fetch(request(addr, "/")).await.unwrap();
    assert!(!response.is_consumed());
    assert_eq!(&response.read_body().await.unwrap()[..], b"hello");
    assert!(response.is_consumed());

    assert!(matches!(
        response.read_body().await,
        Err(RelayError::BodyAlreadyConsumed)
    ));

    let (downstream, _received) = capture_downstream();
    let mut responder = Responder::new(downstream);
    assert!(matches!(
        response.relay_body(&mut responder).await,
        Err(RelayError::BodyAlreadyConsumed)
    ));
}

#[tokio::test]
async fn test_read_chunked_body() {
    let (_origin, addr) = spawn_scripted_origin(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel".to_vec(),
        b"lo\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: yes\r\n\r\n".to_vec(),
    ])
    .await
    .unwrap();

    let mut response = fetch(request(addr, "/chunked")).await.unwrap();
    assert_eq!(response.framing(), BodyFraming::Chunked);
    assert_eq!(&response.read_body().await.unwrap()[..], b"hello world");
}

#[tokio::test]
async fn test_buffered_body_limit() {
    let (_origin, addr) = spawn_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n0123456789")
        .await
        .unwrap();

    let mut request = request(addr, "/");
    let config = RelayConfig {
        max_buffered_body: 4,
        ..Default::default()
    };
    let mut connection = OriginConnection::connect(&request, &config).await.unwrap();
    connection.send(&mut request).await.unwrap();
    let mut response = connection.receive_head(&request).await.unwrap();

    assert!(matches!(response.read_body().await, Err(RelayError::Config(_))));
}

#[tokio::test]
async fn test_interim_responses_are_skipped() {
    let (_origin, addr) = spawn_origin(
        b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok",
    )
    .await
    .unwrap();

    let mut response = fetch(request(addr, "/")).await.unwrap();
    assert_eq!(response.status.as_u16(), 201);
    assert_eq!(response.message, "Created");
    assert_eq!(&response.read_body().await.unwrap()[..], b"ok");
}

#[tokio::test]
async fn test_head_request_has_empty_body() {
    let (_origin, addr) = spawn_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 1234\r\n\r\n")
        .await
        .unwrap();

    let request = RequestSpec::builder(&format!("http://{addr}/"))
        .method("head")
        .build()
        .unwrap();
    let mut response = fetch(request).await.unwrap();
    assert_eq!(response.framing(), BodyFraming::Empty);

    let (downstream, received) = capture_downstream();
    let mut responder = Responder::new(downstream);
    assert_eq!(response.relay_body(&mut responder).await.unwrap(), 0);
    responder.close().await;
    assert!(received.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_head_is_protocol_error() {
    let (_origin, addr) = spawn_origin(b"SPDY/9 what\r\n\r\n").await.unwrap();

    assert!(matches!(
        fetch(request(addr, "/")).await,
        Err(RelayError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_empty_reply_is_connection_error() {
    let (_origin, addr) = spawn_origin(b"").await.unwrap();

    match fetch(request(addr, "/")).await {
        Err(RelayError::Connection(e)) => {
            assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof)
        }
        other => panic!("Expected connection error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_refused() {
    let addr = refused_addr().await.unwrap();

    match fetch(request(addr, "/")).await {
        Err(RelayError::Connection(e)) => {
            assert_eq!(e.kind(), std::io::ErrorKind::ConnectionRefused)
        }
        other => panic!("Expected connection refused, got {other:?}"),
    }
}
