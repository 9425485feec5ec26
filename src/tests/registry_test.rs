#[cfg(test)]
mod tests {
    use crate::conn::Connection;
    use crate::error::RegistryError;
    use crate::registry::Registry;
    use crate::tests::support;

    use std::{sync::Arc, time::Duration};

    use futures::StreamExt;
    use tokio::io::DuplexStream;
    use tokio::time::timeout;
    use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

    /// Registers a fresh duplex-backed connection, returning it together
    /// with the peer (client-role) end for observing delivered frames.
    async fn registered_conn(
        registry: &Registry<DuplexStream>,
    ) -> (
        Arc<Connection<DuplexStream>>,
        WebSocketStream<DuplexStream>,
    ) {
        let (server, client) = support::ws_pair().await;
        let (conn, _reader) = Connection::split(server, support::test_addr());
        registry.add_connection(Arc::clone(&conn)).await;
        (conn, client)
    }

    async fn recv_text(client: &mut WebSocketStream<DuplexStream>) -> String {
        let frame = timeout(Duration::from_secs(1), client.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("no transport error");
        match frame {
            Message::Text(text) => text.to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    async fn assert_silent(client: &mut WebSocketStream<DuplexStream>) {
        let outcome = timeout(Duration::from_millis(50), client.next()).await;
        assert!(outcome.is_err(), "expected no frame, got {outcome:?}");
    }

    #[tokio::test]
    async fn add_and_get_connection() {
        let registry = Registry::new();
        let (conn, _client) = registered_conn(&registry).await;

        assert_eq!(registry.count().await, 1);
        let found = registry.get(conn.id()).await.expect("registered");
        assert_eq!(found.id(), conn.id());
    }

    #[tokio::test]
    async fn remove_connection_clears_directory() {
        let registry = Registry::new();
        let (conn, _client) = registered_conn(&registry).await;

        registry.remove_connection(conn.id()).await;

        assert_eq!(registry.count().await, 0);
        assert!(registry.get(conn.id()).await.is_none());
    }

    #[tokio::test]
    async fn remove_unknown_connection_is_a_noop() {
        let registry: Registry<DuplexStream> = Registry::new();
        registry.remove_connection("no_such").await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn join_requires_a_registered_connection() {
        let registry: Registry<DuplexStream> = Registry::new();

        let err = registry.join("ghost", "room1").await.unwrap_err();
        assert!(matches!(err, RegistryError::ConnectionNotFound(id) if id == "ghost"));
        assert_eq!(registry.group_count("room1").await, 0);
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let registry = Registry::new();
        let (conn, _client) = registered_conn(&registry).await;

        registry.join(conn.id(), "room1").await.unwrap();
        registry.join(conn.id(), "room1").await.unwrap();

        assert_eq!(registry.group_count("room1").await, 1);
    }

    #[tokio::test]
    async fn join_then_leave_leaves_no_residue() {
        let registry = Registry::new();
        let (conn, _client) = registered_conn(&registry).await;

        registry.join(conn.id(), "room1").await.unwrap();
        registry.leave(conn.id(), "room1").await;

        assert!(registry.groups(conn.id()).await.is_empty());
        // The emptied group is pruned, not kept around.
        assert_eq!(registry.group_count("room1").await, 0);
    }

    #[tokio::test]
    async fn leave_unknown_group_is_a_noop() {
        let registry = Registry::new();
        let (conn, _client) = registered_conn(&registry).await;
        registry.leave(conn.id(), "nowhere").await;
        registry.leave("ghost", "nowhere").await;
    }

    #[tokio::test]
    async fn leave_all_clears_every_membership() {
        let registry = Registry::new();
        let (conn, _client) = registered_conn(&registry).await;
        let (other, _other_client) = registered_conn(&registry).await;

        registry.join(conn.id(), "room1").await.unwrap();
        registry.join(conn.id(), "room2").await.unwrap();
        registry.join(other.id(), "room2").await.unwrap();

        registry.leave_all(conn.id()).await;

        assert!(registry.groups(conn.id()).await.is_empty());
        // room2 survives because the other connection is still a member.
        assert_eq!(registry.group_count("room2").await, 1);
        assert_eq!(registry.group_count("room1").await, 0);
    }

    #[tokio::test]
    async fn remove_connection_cascades_group_removal() {
        let registry = Registry::new();
        let (conn, _client) = registered_conn(&registry).await;

        registry.join(conn.id(), "room1").await.unwrap();
        registry.join(conn.id(), "room2").await.unwrap();

        registry.remove_connection(conn.id()).await;

        assert!(registry.groups(conn.id()).await.is_empty());
        assert_eq!(registry.group_count("room1").await, 0);
        assert_eq!(registry.group_count("room2").await, 0);
        assert!(registry.get(conn.id()).await.is_none());
    }

    #[tokio::test]
    async fn groups_lists_memberships() {
        let registry = Registry::new();
        let (conn, _client) = registered_conn(&registry).await;

        registry.join(conn.id(), "room1").await.unwrap();
        registry.join(conn.id(), "room2").await.unwrap();

        let mut groups = registry.groups(conn.id()).await;
        groups.sort();
        assert_eq!(groups, vec!["room1".to_string(), "room2".to_string()]);
    }

    #[tokio::test]
    async fn all_and_filter_snapshot_connections() {
        let registry = Registry::new();
        let (a, _ca) = registered_conn(&registry).await;
        let (_b, _cb) = registered_conn(&registry).await;

        assert_eq!(registry.all().await.len(), 2);

        let only_a = registry.filter(|c| c.id() == a.id()).await;
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].id(), a.id());
    }

    #[tokio::test]
    async fn group_broadcast_reaches_members_only() {
        let registry = Registry::new();
        let (a, mut client_a) = registered_conn(&registry).await;
        let (b, mut client_b) = registered_conn(&registry).await;
        let (_c, mut client_c) = registered_conn(&registry).await;

        registry.join(a.id(), "room1").await.unwrap();
        registry.join(b.id(), "room1").await.unwrap();

        registry
            .broadcast_to_group_text("room1", "hi")
            .await
            .expect("all members reachable");

        assert_eq!(recv_text(&mut client_a).await, "hi");
        assert_eq!(recv_text(&mut client_b).await, "hi");
        assert_silent(&mut client_c).await;
    }

    #[tokio::test]
    async fn group_broadcast_binary() {
        let registry = Registry::new();
        let (a, mut client_a) = registered_conn(&registry).await;
        registry.join(a.id(), "room1").await.unwrap();

        registry
            .broadcast_to_group("room1", &[7, 8, 9])
            .await
            .expect("member reachable");

        let frame = timeout(Duration::from_secs(1), client_a.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("no transport error");
        assert_eq!(frame, Message::Binary(vec![7, 8, 9].into()));
    }

    #[tokio::test]
    async fn broadcast_to_all_reaches_everyone() {
        let registry = Registry::new();
        let (_a, mut client_a) = registered_conn(&registry).await;
        let (_b, mut client_b) = registered_conn(&registry).await;

        registry
            .broadcast_to_all_text("everyone")
            .await
            .expect("all reachable");

        assert_eq!(recv_text(&mut client_a).await, "everyone");
        assert_eq!(recv_text(&mut client_b).await, "everyone");
    }

    #[tokio::test]
    async fn broadcast_to_missing_group_is_ok() {
        let registry: Registry<DuplexStream> = Registry::new();
        registry
            .broadcast_to_group_text("empty", "anyone?")
            .await
            .expect("zero recipients, zero failures");
    }

    #[tokio::test]
    async fn partial_failure_reports_counts_and_still_delivers() {
        let registry = Registry::new();
        let (a, mut client_a) = registered_conn(&registry).await;
        let (b, mut client_b) = registered_conn(&registry).await;
        let (c, _client_c) = registered_conn(&registry).await;

        registry.join(a.id(), "room1").await.unwrap();
        registry.join(b.id(), "room1").await.unwrap();
        registry.join(c.id(), "room1").await.unwrap();

        // One member is dead before the broadcast.
        c.close().await;

        let err = registry
            .broadcast_to_group_text("room1", "hi")
            .await
            .unwrap_err();
        assert_eq!(err.failed, 1);
        assert_eq!(err.total, 3);
        assert!(err.to_string().contains("1 of 3"));
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].0, c.id());

        // The two healthy members still got the message.
        assert_eq!(recv_text(&mut client_a).await, "hi");
        assert_eq!(recv_text(&mut client_b).await, "hi");
    }

    #[tokio::test]
    async fn concurrent_membership_and_broadcast() {
        let registry = Arc::new(Registry::new());
        let mut clients = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..8 {
            let (conn, client) = registered_conn(&registry).await;
            ids.push(conn.id().to_string());
            clients.push(client);
        }

        // Drain every client so broadcasts never stall on a full buffer.
        let drains: Vec<_> = clients
            .into_iter()
            .map(|mut client| {
                tokio::spawn(async move { while client.next().await.is_some() {} })
            })
            .collect();

        let mut tasks = Vec::new();
        for id in &ids {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..20 {
                    registry.join(&id, "busy").await.unwrap();
                    registry
                        .broadcast_to_group_text("busy", "tick")
                        .await
                        .unwrap();
                    if round % 2 == 0 {
                        registry.leave(&id, "busy").await;
                    }
                }
            }));
        }
        for task in tasks {
            timeout(Duration::from_secs(5), task)
                .await
                .expect("no deadlock")
                .expect("no panic");
        }

        assert_eq!(registry.count().await, 8);
        for drain in drains {
            drain.abort();
        }
    }
}
