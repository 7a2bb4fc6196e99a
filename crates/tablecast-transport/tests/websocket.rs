//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener and a `tokio-tungstenite` client to check
//! that text frames flow both ways and that the upgrade path is enforced.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tablecast_transport::{
        Connection, Transport, TransportError, WebSocketTransport,
    };
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn connect_client(addr: &str, path: &str) -> ClientWs {
        let url = format!("ws://{addr}{path}");
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("client should connect");
        ws
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr").to_string();

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let mut client_ws = connect_client(&addr, "/ws").await;
        let server_conn = server_handle.await.expect("task should complete");

        // --- Server sends, client receives ---
        server_conn
            .send_text(r#"{"type":"pong","timestamp":1}"#)
            .await
            .expect("send should succeed");

        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(
            msg.into_text().unwrap().as_str(),
            r#"{"type":"pong","timestamp":1}"#,
        );

        // --- Client sends, server receives ---
        client_ws
            .send(Message::text(r#"{"type":"ping"}"#.to_string()))
            .await
            .unwrap();

        let received = server_conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, r#"{"type":"ping"}"#);

        server_conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().unwrap().to_string();

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let mut client_ws = connect_client(&addr, "/ws").await;
        let server_conn = server_handle.await.unwrap();

        client_ws.send(Message::Close(None)).await.unwrap();

        let result = server_conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_send_while_recv_pending() {
        // A reader parked in recv() must not block the writer half.
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().unwrap().to_string();

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let mut client_ws = connect_client(&addr, "/ws").await;
        let server_conn =
            std::sync::Arc::new(server_handle.await.unwrap());

        let reader = std::sync::Arc::clone(&server_conn);
        let pending = tokio::spawn(async move { reader.recv().await });

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            server_conn.send_text("hello"),
        )
        .await
        .expect("send must not wait for recv")
        .expect("send should succeed");

        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_text().unwrap().as_str(), "hello");
        pending.abort();
    }

    #[tokio::test]
    async fn test_websocket_rejects_other_upgrade_paths() {
        let mut transport =
            WebSocketTransport::bind_with_path("127.0.0.1:0", "/realtime")
                .await
                .expect("should bind");
        let addr = transport.local_addr().unwrap().to_string();

        let server_handle =
            tokio::spawn(async move { transport.accept().await });

        let url = format!("ws://{addr}/somewhere-else");
        let client = tokio_tungstenite::connect_async(&url).await;
        assert!(client.is_err(), "client upgrade should be refused");

        let accepted = server_handle.await.unwrap();
        match accepted {
            Err(TransportError::PathRejected(path)) => {
                assert_eq!(path, "/somewhere-else");
            }
            Err(other) => panic!("expected PathRejected, got {other}"),
            Ok(_) => panic!("expected PathRejected, got a connection"),
        }
    }

    #[tokio::test]
    async fn test_idle_socket_does_not_hold_up_other_upgrades() {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr").to_string();

        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok(pending) = transport.accept_stream().await {
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let _ = done_tx.send(pending.upgrade().await.is_ok());
                });
            }
        });

        // Connects but never sends an upgrade request.
        let _idle = tokio::net::TcpStream::connect(&addr).await.unwrap();

        let client = tokio::time::timeout(
            Duration::from_secs(2),
            connect_client(&addr, "/ws"),
        )
        .await;
        assert!(client.is_ok(), "second client must not wait on the idle one");

        let upgraded = tokio::time::timeout(Duration::from_secs(2), done_rx.recv())
            .await
            .expect("an upgrade should finish")
            .unwrap();
        assert!(upgraded);
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind")
            .with_handshake_timeout(Duration::from_millis(50));
        let addr = transport.local_addr().expect("local addr").to_string();

        let _idle = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let pending = transport.accept_stream().await.expect("tcp accept");

        let err = pending.upgrade().await.err().expect("should time out");
        assert!(matches!(
            err,
            TransportError::HandshakeTimeout(t) if t == Duration::from_millis(50)
        ));
    }
}
