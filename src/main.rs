use std::sync::Arc;

use gale::{channel::ChannelHandlers, registry::Registry, serve::ChannelRoute};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let registry: Arc<Registry<TcpStream>> = Arc::new(Registry::new());
    let reg = Arc::clone(&registry);

    let handlers = ChannelHandlers::<TcpStream, ()>::builder()
        .on_connect(|conn, _ctx| async move {
            conn.send_text("type /join <room>, /leave <room>, or a message")
                .await?;
            Ok(())
        })
        .on_message(move |conn, msg, _ctx| {
            let registry = Arc::clone(&reg);
            async move {
                let Some(text) = msg.as_text() else {
                    return Ok(());
                };
                if let Some(room) = text.strip_prefix("/join ") {
                    registry.join(conn.id(), room.trim()).await?;
                    conn.send_text(format!("joined {}", room.trim())).await?;
                } else if let Some(room) = text.strip_prefix("/leave ") {
                    registry.leave(conn.id(), room.trim()).await;
                    conn.send_text(format!("left {}", room.trim())).await?;
                } else {
                    for room in registry.groups(conn.id()).await {
                        registry.broadcast_to_group_text(&room, text).await?;
                    }
                }
                Ok(())
            }
        })
        .on_disconnect(|id, _ctx, cause| async move {
            match cause {
                Some(cause) => tracing::info!(conn_id = %id, %cause, "dropped"),
                None => tracing::info!(conn_id = %id, "left"),
            }
        })
        .build()
        .expect("on_message is set");

    let route = ChannelRoute::new(handlers, registry);
    route.listen(3001, |_addr| ()).await.expect("listen failed");
}
