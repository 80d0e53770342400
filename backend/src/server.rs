//! Client websocket server. Each connection gets one [`Client`], a writer
//! task draining its outbound queue and a reader loop feeding it control
//! messages.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use common::logger::{TraceId, annotate_span, root_span};
use session::initial::InitialValueResolver;
use session::replay::ReplaySource;
use session::{Client, ClientConfig, ClientIo, SubscriptionHub};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a connection needs to build its client.
#[derive(Clone)]
pub struct ServerContext {
    pub hub: SubscriptionHub,
    pub resolver: Arc<dyn InitialValueResolver>,
    pub source: Arc<dyn ReplaySource>,
    pub client_config: ClientConfig,
}

pub async fn serve(listener: TcpListener, ctx: ServerContext) -> anyhow::Result<()> {
    info!(addr = ?listener.local_addr()?, "client server listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let ctx = ctx.clone();
        let span = root_span("connection", &TraceId::new(Uuid::new_v4().to_string()));
        tokio::spawn(
            async move {
                if let Err(e) = handle_connection(stream, ctx).await {
                    debug!(peer = %peer, error = %e, "connection ended with error");
                }
            }
            .instrument(span),
        );
    }
}

/// `userId` from a request query such as `?userId=abc&x=1`.
pub fn user_id_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "userId")
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}

async fn handle_connection(stream: TcpStream, ctx: ServerContext) -> anyhow::Result<()> {
    let mut user_id = None;
    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
        user_id = user_id_from_query(req.uri().query());
        Ok::<Response, ErrorResponse>(resp)
    })
    .await?;

    let (mut client, io) = Client::new(
        ctx.hub,
        user_id,
        ctx.resolver,
        ctx.source,
        ctx.client_config,
    );
    annotate_span(None, Some(&client.id()));
    info!(user_id = client.user_id().unwrap_or("-"), "client connected");

    let ClientIo {
        mut outbound,
        shutdown,
    } = io;
    let (mut write, mut read) = ws.split();

    let writer = tokio::spawn(
        async move {
            while let Some(frame) = outbound.recv().await {
                if let Err(e) = write.send(Message::Text(frame.to_string().into())).await {
                    debug!(error = %e, "write failed, stopping writer");
                    break;
                }
            }
            let _ = write.close().await;
        }
        .in_current_span(),
    );

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("client shutdown requested");
                break;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => client.handle_text(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "read failed");
                    break;
                }
            },
        }
    }

    client.close();
    drop(client);

    if !drain_writer(writer, WRITER_DRAIN_TIMEOUT).await {
        warn!("writer did not drain in time, connection dropped");
    }
    info!("client disconnected");
    Ok(())
}

/// Waits up to `within` for the writer to flush and close. A writer stuck on
/// a peer that stopped reading is aborted, which drops the socket.
async fn drain_writer(mut writer: JoinHandle<()>, within: Duration) -> bool {
    if tokio::time::timeout(within, &mut writer).await.is_ok() {
        return true;
    }
    writer.abort();
    let _ = writer.await;
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_is_read_from_query() {
        assert_eq!(user_id_from_query(Some("userId=u-1")), Some("u-1".into()));
        assert_eq!(user_id_from_query(Some("a=1&userId=u-2")), Some("u-2".into()));
        assert_eq!(user_id_from_query(Some("userId=")), None);
        assert_eq!(user_id_from_query(Some("user=u")), None);
        assert_eq!(user_id_from_query(None), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_writer_is_aborted_and_releases_its_socket() {
        // The sender stands in for the write half the task owns.
        let (socket, mut peer) = tokio::sync::mpsc::channel::<()>(1);
        let writer = tokio::spawn(async move {
            let _socket = socket;
            std::future::pending::<()>().await;
        });

        assert!(!drain_writer(writer, Duration::from_secs(5)).await);
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_writer_drains_cleanly() {
        let writer = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
        });
        assert!(drain_writer(writer, Duration::from_secs(5)).await);
    }
}
