//! The authenticated channel pair to the hub.
//!
//! Two websockets to the same endpoint: one carries serialized
//! request/response traffic, the other is dedicated to push events and is
//! read by the registry's receive loop. The pair lives and dies together;
//! a shared cancellation token marks both dead as soon as either side
//! closes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::catalog::Catalog;
use crate::config::HassSettings;
use crate::error::Error;
use crate::host::DeckHost;
use crate::icons::IconResolver;
use crate::protocol::{
    AuthMessage, CorrelationIds, Envelope, Request, ResultMessage, ServerMessage,
};
use crate::registry;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type EventSink = SplitSink<WsStream, Message>;
pub(crate) type EventStream = SplitStream<WsStream>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

const PROBE_PAYLOAD: &[u8] = b"liveness";

/// An open, authenticated channel pair.
///
/// Owned by the background worker; every request/response exchange runs to
/// completion (or times out) before the next one starts, so at most one
/// request is ever awaiting a response on the command channel.
pub(crate) struct Connection {
    cmd: WsStream,
    event_sink: EventSink,
    /// Pong frames observed by the event receive loop.
    pong_rx: mpsc::Receiver<Bytes>,
    lifecycle: CancellationToken,
    event_task: JoinHandle<()>,
    ids: CorrelationIds,
}

impl Connection {
    /// Open and authenticate both channels, then start the event receive
    /// loop. Fails without side effects if either channel cannot be
    /// established.
    pub(crate) async fn establish(
        settings: &HassSettings,
        catalog: Arc<RwLock<Catalog>>,
        host: Arc<dyn DeckHost>,
        resolver: Arc<IconResolver>,
    ) -> Result<Self, Error> {
        let url = settings.websocket_url()?;
        let cmd = open_channel(&url, &settings.token).await?;
        let event = open_channel(&url, &settings.token).await?;
        let (event_sink, event_stream) = event.split();

        let (pong_tx, pong_rx) = mpsc::channel(8);
        let lifecycle = CancellationToken::new();
        let event_task = tokio::spawn(registry::run_event_loop(
            event_stream,
            catalog,
            host,
            resolver,
            pong_tx,
            lifecycle.clone(),
        ));

        Ok(Self {
            cmd,
            event_sink,
            pong_rx,
            lifecycle,
            event_task,
            ids: CorrelationIds::new(),
        })
    }

    /// Send a request on the command channel and wait for its matching
    /// response, returning the result payload of a successful command.
    pub(crate) async fn request(&mut self, request: Request) -> Result<serde_json::Value, Error> {
        let id = self.ids.next();
        let json = Envelope { id, request }.to_json()?;
        self.cmd.send(Message::Text(json.into())).await?;

        let result = self.await_response(id).await?;
        if result.success {
            Ok(result.result)
        } else {
            Err(Error::CommandFailed { id })
        }
    }

    /// Issue a state-change trigger subscription on the event channel and
    /// return its correlation id (the subscription id). The acknowledgment
    /// arrives on the event channel and is absorbed by the receive loop.
    pub(crate) async fn subscribe_trigger(&mut self, entity_id: &str) -> Result<u64, Error> {
        let id = self.ids.next();
        let json = Envelope {
            id,
            request: Request::subscribe_state_trigger(entity_id),
        }
        .to_json()?;
        self.event_sink.send(Message::Text(json.into())).await?;
        debug!(entity_id, subscription = id, "subscribed to state changes");
        Ok(id)
    }

    /// Cancel a push subscription previously set up with
    /// [`subscribe_trigger`](Self::subscribe_trigger).
    pub(crate) async fn unsubscribe(&mut self, subscription_id: u64) -> Result<(), Error> {
        let id = self.ids.next();
        let json = Envelope {
            id,
            request: Request::UnsubscribeEvents { subscription_id },
        }
        .to_json()?;
        self.event_sink.send(Message::Text(json.into())).await?;
        debug!(subscription = subscription_id, "unsubscribed");
        Ok(())
    }

    /// Liveness probe: a websocket ping on each channel, both answered
    /// within [`PROBE_TIMEOUT`].
    pub(crate) async fn probe(&mut self) -> bool {
        if self.lifecycle.is_cancelled() {
            return false;
        }
        self.probe_command_channel().await && self.probe_event_channel().await
    }

    /// Close both channels and stop the event receive loop.
    pub(crate) async fn close(mut self) {
        self.lifecycle.cancel();
        let _ = self.cmd.close(None).await;
        let _ = self.event_sink.close().await;
        let _ = self.event_task.await;
        debug!("connection closed");
    }

    async fn await_response(&mut self, id: u64) -> Result<ResultMessage, Error> {
        loop {
            let frame = timeout(RESPONSE_TIMEOUT, self.cmd.next())
                .await
                .map_err(|_| Error::Timeout {
                    id,
                    timeout_secs: RESPONSE_TIMEOUT.as_secs(),
                })?
                .ok_or_else(|| Error::Connection("command channel closed".to_string()))??;

            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(Error::Connection("command channel closed".to_string()))
                }
                _ => continue,
            };

            match ServerMessage::parse(text.as_str()) {
                Ok(ServerMessage::CommandResult(result)) if result.id == id => return Ok(result),
                // Requests are serialized, so an uncorrelated frame can only
                // be the late answer to a request that already timed out.
                Ok(other) => trace!(?other, "skipping uncorrelated frame"),
                Err(e) => warn!(error = %e, "skipping unreadable frame"),
            }
        }
    }

    async fn probe_command_channel(&mut self) -> bool {
        let payload = Bytes::from_static(PROBE_PAYLOAD);
        if self.cmd.send(Message::Ping(payload.clone())).await.is_err() {
            return false;
        }
        let answered = async {
            while let Some(frame) = self.cmd.next().await {
                match frame {
                    Ok(Message::Pong(pong)) if pong == payload => return true,
                    Ok(Message::Close(_)) | Err(_) => return false,
                    // Stray frames get the same treatment as in
                    // await_response: dropped.
                    Ok(_) => {}
                }
            }
            false
        };
        timeout(PROBE_TIMEOUT, answered).await.unwrap_or(false)
    }

    async fn probe_event_channel(&mut self) -> bool {
        // Drop pongs left over from an earlier probe.
        while self.pong_rx.try_recv().is_ok() {}

        let payload = Bytes::from_static(PROBE_PAYLOAD);
        if self
            .event_sink
            .send(Message::Ping(payload))
            .await
            .is_err()
        {
            return false;
        }
        matches!(timeout(PROBE_TIMEOUT, self.pong_rx.recv()).await, Ok(Some(_)))
    }
}

/// Open one channel and run the auth handshake on it.
///
/// `auth_required` → `auth` with the access token → `auth_ok`. Any other
/// sequence, a refusal, or a missed deadline fails the attempt.
async fn open_channel(url: &str, token: &str) -> Result<WsStream, Error> {
    let (mut channel, _) = timeout(CONNECT_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| Error::Connection(format!("timed out opening {url}")))?
        .map_err(|e| Error::Connection(e.to_string()))?;

    match recv_handshake_message(&mut channel).await? {
        ServerMessage::AuthRequired { .. } => {}
        other => {
            return Err(Error::Protocol(format!(
                "expected auth_required, got {other:?}"
            )))
        }
    }

    let auth = AuthMessage::new(token).to_json()?;
    channel.send(Message::Text(auth.into())).await?;

    match recv_handshake_message(&mut channel).await? {
        ServerMessage::AuthOk { .. } => Ok(channel),
        ServerMessage::AuthInvalid { message } => Err(Error::Auth(
            message.unwrap_or_else(|| "access token refused".to_string()),
        )),
        other => Err(Error::Protocol(format!("expected auth_ok, got {other:?}"))),
    }
}

async fn recv_handshake_message(channel: &mut WsStream) -> Result<ServerMessage, Error> {
    loop {
        let frame = timeout(HANDSHAKE_TIMEOUT, channel.next())
            .await
            .map_err(|_| Error::Connection("handshake timed out".to_string()))?
            .ok_or_else(|| Error::Connection("channel closed during handshake".to_string()))??;

        match frame {
            Message::Text(text) => return ServerMessage::parse(text.as_str()),
            Message::Close(_) => {
                return Err(Error::Connection(
                    "channel closed during handshake".to_string(),
                ))
            }
            // Control frames may interleave with the handshake.
            _ => {}
        }
    }
}
