//! Consumer-interest bookkeeping and the push-event receive loop.
//!
//! Interest is reference-counted per entity through the catalog's consumer
//! sets: the first interested button subscribes upstream, the last one
//! leaving unsubscribes. The receive loop fans each state-change event out
//! to every interested button and asks the host for a single redraw per
//! event.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::button::ButtonRef;
use crate::catalog::Catalog;
use crate::connection::{Connection, EventStream};
use crate::error::Error;
use crate::host::{DeckHost, PLUGIN_NAME};
use crate::icons::IconResolver;
use crate::protocol::{EntityState, ServerMessage};
use crate::render;

/// Register a button's interest in an entity.
///
/// Unknown entities are a no-op. The upstream subscription is issued only
/// on the transition from zero to non-zero interest.
pub(crate) async fn track(
    connection: &mut Connection,
    catalog: &RwLock<Catalog>,
    entity_id: &str,
    button: ButtonRef,
) -> Result<(), Error> {
    {
        let mut catalog = catalog.write().await;
        let Some(entry) = catalog.entry_mut(entity_id) else {
            debug!(entity_id, "track ignored, entity not in catalog");
            return Ok(());
        };
        if !entry.consumers.insert(button) {
            // Button already registered.
            return Ok(());
        }
        if entry.subscription.is_some() {
            // Some other button already holds the subscription.
            return Ok(());
        }
    }

    let subscription = connection.subscribe_trigger(entity_id).await?;
    if let Some(entry) = catalog.write().await.entry_mut(entity_id) {
        entry.subscription = Some(subscription);
    }
    Ok(())
}

/// Drop a button's interest in an entity.
///
/// The upstream subscription is cancelled only when the last interested
/// button leaves.
pub(crate) async fn untrack(
    connection: &mut Connection,
    catalog: &RwLock<Catalog>,
    entity_id: &str,
    button: &ButtonRef,
) -> Result<(), Error> {
    let stale = {
        let mut catalog = catalog.write().await;
        let Some(entry) = catalog.entry_mut(entity_id) else {
            return Ok(());
        };
        entry.consumers.remove(button);
        if entry.consumers.is_empty() {
            entry.subscription.take()
        } else {
            None
        }
    };

    if let Some(subscription_id) = stale {
        connection.unsubscribe(subscription_id).await?;
    }
    Ok(())
}

/// Receive loop for the event channel.
///
/// Processes push envelopes in arrival order until the channel closes or
/// the lifecycle token is cancelled; on exit it cancels the token so the
/// paired command channel is treated as dead too.
pub(crate) async fn run_event_loop(
    mut events: EventStream,
    catalog: Arc<RwLock<Catalog>>,
    host: Arc<dyn DeckHost>,
    resolver: Arc<IconResolver>,
    pong_tx: mpsc::Sender<Bytes>,
    lifecycle: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = lifecycle.cancelled() => break,
            frame = events.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(text.as_str(), &catalog, &*host, &resolver).await;
                    }
                    Some(Ok(Message::Pong(payload))) => {
                        let _ = pong_tx.try_send(payload);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("event channel closed, ending receive loop");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "event channel error, ending receive loop");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    lifecycle.cancel();
}

async fn handle_frame(
    text: &str,
    catalog: &RwLock<Catalog>,
    host: &dyn DeckHost,
    resolver: &IconResolver,
) {
    let message = match ServerMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "ignoring unreadable event frame");
            return;
        }
    };

    match message {
        ServerMessage::Event(event) => match event.into_state() {
            Some(state) => fan_out(state, catalog, host, resolver).await,
            None => trace!("event without state-change payload"),
        },
        ServerMessage::CommandResult(result) if !result.success => {
            warn!(id = result.id, "subscription command failed");
        }
        // Subscription acknowledgments and the like.
        other => trace!(?other, "ignoring non-event frame"),
    }
}

/// Push one state change to every interested button, then request a single
/// redraw. Events for entities the catalog does not know are dropped.
async fn fan_out(
    state: EntityState,
    catalog: &RwLock<Catalog>,
    host: &dyn DeckHost,
    resolver: &IconResolver,
) {
    if state.entity_id.is_empty() {
        return;
    }

    // Snapshot consumers and the icon hint, then release the lock before
    // calling into the host.
    let (consumers, icon_hint) = {
        let mut catalog = catalog.write().await;
        let Some(entry) = catalog.entry_mut(&state.entity_id) else {
            debug!(entity = %state.entity_id, "dropping event for unknown entity");
            return;
        };
        entry.state = state.state.clone();
        (
            entry.consumers.iter().cloned().collect::<Vec<_>>(),
            entry.icon.clone(),
        )
    };

    if consumers.is_empty() {
        return;
    }

    for button in &consumers {
        let settings = host
            .button_settings(button, PLUGIN_NAME)
            .await
            .unwrap_or_default();
        render::render_button(host, resolver, button, &settings.service, &state, &icon_hint)
            .await;
    }
    host.request_redraw().await;
}
