mod registry_test;

pub(crate) mod support {
    use std::net::SocketAddr;

    use tokio::io::DuplexStream;
    use tokio_tungstenite::{tungstenite::protocol::Role, WebSocketStream};

    /// In-memory WebSocket pair backed by `tokio::io::duplex`: the
    /// server-role end is returned first, the client-role end second.
    pub async fn ws_pair() -> (
        WebSocketStream<DuplexStream>,
        WebSocketStream<DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (server, client)
    }

    pub fn test_addr() -> SocketAddr {
        "127.0.0.1:0".parse().expect("valid loopback addr")
    }
}
