//! Public facade and the background worker it dispatches into.
//!
//! Facade calls originate on arbitrary host threads. Each call is turned
//! into a [`Command`] carrying a oneshot reply channel, queued to a single
//! worker thread running a current-thread tokio runtime, and the caller
//! blocks until the worker answers. The worker owns all mutable link
//! state and handles commands strictly one at a time, which is what makes
//! the command channel's single-awaiter response correlation sound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::button::ButtonRef;
use crate::catalog::{self, Catalog};
use crate::config::{ButtonSettings, HassSettings};
use crate::connection::Connection;
use crate::error::Error;
use crate::host::{DeckHost, PLUGIN_NAME};
use crate::icons::IconResolver;
use crate::protocol::{EntityState, Request};
use crate::registry;
use crate::render;

/// Commands the facade queues to the worker.
enum Command {
    Connect { reply: oneshot::Sender<bool> },
    Disconnect { reply: oneshot::Sender<()> },
    IsConnected { reply: oneshot::Sender<bool> },
    ApplySettings { settings: HassSettings, reply: oneshot::Sender<()> },
    Initialize { settings: HassSettings, reply: oneshot::Sender<()> },
    Domains { reply: oneshot::Sender<Vec<String>> },
    Entities { domain: String, reply: oneshot::Sender<Vec<String>> },
    Services { domain: String, reply: oneshot::Sender<Vec<String>> },
    State { entity_id: String, reply: oneshot::Sender<EntityState> },
    CallService { entity_id: String, service: String, reply: oneshot::Sender<()> },
    Icon { entity_id: String, service: String, state: String, reply: oneshot::Sender<String> },
    Track { entity_id: String, button: ButtonRef, reply: oneshot::Sender<()> },
    Untrack { entity_id: String, button: ButtonRef, reply: oneshot::Sender<()> },
    ApplyButtonSettings { button: ButtonRef, settings: ButtonSettings, reply: oneshot::Sender<()> },
    Shutdown,
}

/// Synchronous-looking entry points over the background worker.
///
/// All methods are safe to call from any host thread. They must not be
/// called from code the worker itself invokes (a [`DeckHost`]
/// implementation, for instance) -- the worker would be waiting on itself.
///
/// Failures never escalate: operations degrade to `false`, empty results,
/// or no-ops, with the cause logged.
pub struct HomeAssistant {
    host: Arc<dyn DeckHost>,
    worker: Mutex<Option<Worker>>,
}

impl HomeAssistant {
    pub fn new(host: Arc<dyn DeckHost>) -> Self {
        Self {
            host,
            worker: Mutex::new(None),
        }
    }

    /// Establish both channels if they are not already open. Idempotent
    /// while the connection stays alive; returns `false` when settings are
    /// missing or the hub cannot be reached.
    pub fn connect(&self) -> bool {
        self.dispatch(|reply| Command::Connect { reply }).unwrap_or(false)
    }

    /// Tear down both channels and stop the event receive loop.
    pub fn disconnect(&self) {
        self.dispatch(|reply| Command::Disconnect { reply });
    }

    /// Liveness probe on both channels, not just a "looks open" check.
    pub fn is_connected(&self) -> bool {
        self.dispatch(|reply| Command::IsConnected { reply })
            .unwrap_or(false)
    }

    /// Store new connection settings, then reconnect with them.
    pub fn apply_settings(&self, settings: HassSettings) {
        self.dispatch(|reply| Command::ApplySettings { settings, reply });
    }

    /// Apply settings, load the catalog, and re-apply every configured
    /// button from the host's snapshot.
    pub fn initialize(&self, settings: HassSettings) {
        self.dispatch(|reply| Command::Initialize { settings, reply });
    }

    /// All known domains, in the order the hub reported them.
    pub fn get_domains(&self) -> Vec<String> {
        self.dispatch(|reply| Command::Domains { reply })
            .unwrap_or_default()
    }

    /// All entity ids in one domain, sorted.
    pub fn get_entities(&self, domain: &str) -> Vec<String> {
        let domain = domain.to_string();
        self.dispatch(|reply| Command::Entities { domain, reply })
            .unwrap_or_default()
    }

    /// Service names the hub exposes for one domain.
    pub fn get_services(&self, domain: &str) -> Vec<String> {
        let domain = domain.to_string();
        self.dispatch(|reply| Command::Services { domain, reply })
            .unwrap_or_default()
    }

    /// Current state of one entity; an `"off"` placeholder when the hub
    /// does not know it or cannot be reached.
    pub fn get_state(&self, entity_id: &str) -> EntityState {
        let id = entity_id.to_string();
        self.dispatch(|reply| Command::State { entity_id: id, reply })
            .unwrap_or_else(|| EntityState::off(entity_id))
    }

    /// Resolved SVG markup for an entity/service/state triple, using the
    /// catalog's icon hint. Empty when unconnected.
    pub fn get_icon(&self, entity_id: &str, service: &str, state: &str) -> String {
        let entity_id = entity_id.to_string();
        let service = service.to_string();
        let state = state.to_string();
        self.dispatch(|reply| Command::Icon { entity_id, service, state, reply })
            .unwrap_or_default()
    }

    /// Invoke a service on one entity. Failures are logged only.
    pub fn call_service(&self, entity_id: &str, service: &str) {
        let entity_id = entity_id.to_string();
        let service = service.to_string();
        self.dispatch(|reply| Command::CallService { entity_id, service, reply });
    }

    /// Register a button's interest in an entity's state changes.
    pub fn track(&self, entity_id: &str, button: ButtonRef) {
        let entity_id = entity_id.to_string();
        self.dispatch(|reply| Command::Track { entity_id, button, reply });
    }

    /// Drop a button's interest in an entity's state changes.
    pub fn untrack(&self, entity_id: &str, button: ButtonRef) {
        let entity_id = entity_id.to_string();
        self.dispatch(|reply| Command::Untrack { entity_id, button, reply });
    }

    /// React to a button's per-button settings changing: move tracking
    /// from the old entity to the new one and render the button's current
    /// state (or clear it when the binding was removed).
    pub fn apply_button_settings(&self, button: ButtonRef, settings: ButtonSettings) {
        self.dispatch(|reply| Command::ApplyButtonSettings { button, settings, reply });
    }

    /// Host callback for a button press: invoke the configured service.
    pub fn button_pressed(&self, settings: &ButtonSettings) {
        if !settings.entity.is_empty() && !settings.service.is_empty() {
            self.call_service(&settings.entity, &settings.service);
        }
    }

    /// Queue a command to the worker (spawning it on first use) and block
    /// until the reply arrives.
    fn dispatch<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut guard = self.worker.lock().expect("worker lock poisoned");
            if guard.is_none() {
                match Worker::spawn(self.host.clone()) {
                    Ok(worker) => *guard = Some(worker),
                    Err(e) => {
                        error!(error = %e, "could not start background worker");
                        return None;
                    }
                }
            }
            let sent = guard
                .as_ref()
                .is_some_and(|worker| worker.commands.send(make(reply_tx)).is_ok());
            if !sent {
                error!("background worker is gone");
                return None;
            }
        }
        reply_rx.blocking_recv().ok()
    }
}

impl Drop for HomeAssistant {
    fn drop(&mut self) {
        let Ok(mut guard) = self.worker.lock() else {
            return;
        };
        if let Some(mut worker) = guard.take() {
            let _ = worker.commands.send(Command::Shutdown);
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

/// Handle to the background worker thread.
struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Start the worker: one dedicated thread driving a current-thread
    /// tokio runtime. All network I/O and link state live there.
    fn spawn(host: Arc<dyn DeckHost>) -> Result<Self, std::io::Error> {
        let (commands, queue) = mpsc::unbounded_channel();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let thread = thread::Builder::new()
            .name("hass-link".to_string())
            .spawn(move || runtime.block_on(run_worker(queue, host)))?;
        Ok(Self {
            commands,
            thread: Some(thread),
        })
    }
}

async fn run_worker(mut queue: mpsc::UnboundedReceiver<Command>, host: Arc<dyn DeckHost>) {
    let mut link = Link::new(host);
    while let Some(command) = queue.recv().await {
        match command {
            Command::Connect { reply } => {
                let _ = reply.send(link.connect().await);
            }
            Command::Disconnect { reply } => {
                link.disconnect().await;
                let _ = reply.send(());
            }
            Command::IsConnected { reply } => {
                let _ = reply.send(link.is_connected().await);
            }
            Command::ApplySettings { settings, reply } => {
                link.apply_settings(settings).await;
                let _ = reply.send(());
            }
            Command::Initialize { settings, reply } => {
                link.initialize(settings).await;
                let _ = reply.send(());
            }
            Command::Domains { reply } => {
                let _ = reply.send(link.domains().await);
            }
            Command::Entities { domain, reply } => {
                let _ = reply.send(link.entities(&domain).await);
            }
            Command::Services { domain, reply } => {
                let _ = reply.send(link.services(&domain).await);
            }
            Command::State { entity_id, reply } => {
                let _ = reply.send(link.state(&entity_id).await);
            }
            Command::CallService { entity_id, service, reply } => {
                link.call_service(&entity_id, &service).await;
                let _ = reply.send(());
            }
            Command::Icon { entity_id, service, state, reply } => {
                let _ = reply.send(link.icon(&entity_id, &service, &state).await);
            }
            Command::Track { entity_id, button, reply } => {
                link.track(&entity_id, button).await;
                let _ = reply.send(());
            }
            Command::Untrack { entity_id, button, reply } => {
                link.untrack(&entity_id, &button).await;
                let _ = reply.send(());
            }
            Command::ApplyButtonSettings { button, settings, reply } => {
                link.apply_button_settings(button, settings).await;
                let _ = reply.send(());
            }
            Command::Shutdown => break,
        }
    }
    link.disconnect().await;
}

/// Worker-side link state. Only the dispatch loop mutates it; the event
/// receive loop shares the catalog through its lock.
struct Link {
    settings: Option<HassSettings>,
    connection: Option<Connection>,
    catalog: Arc<RwLock<Catalog>>,
    services: Option<HashMap<String, Vec<String>>>,
    /// Which entity each configured button is currently bound to; used to
    /// untrack the old entity when a button is reconfigured.
    button_entities: HashMap<ButtonRef, String>,
    host: Arc<dyn DeckHost>,
    resolver: Arc<IconResolver>,
}

impl Link {
    fn new(host: Arc<dyn DeckHost>) -> Self {
        Self {
            settings: None,
            connection: None,
            catalog: Arc::new(RwLock::new(Catalog::default())),
            services: None,
            button_entities: HashMap::new(),
            host,
            resolver: Arc::new(IconResolver::bundled()),
        }
    }

    async fn connect(&mut self) -> bool {
        if let Some(connection) = self.connection.as_mut() {
            if connection.probe().await {
                return true;
            }
        }
        let Some(settings) = self.settings.clone() else {
            debug!("connect requested before settings were applied");
            return false;
        };

        // Drain a superseded or dead connection before re-establishing.
        if let Some(stale) = self.connection.take() {
            stale.close().await;
        }

        match Connection::establish(
            &settings,
            self.catalog.clone(),
            self.host.clone(),
            self.resolver.clone(),
        )
        .await
        {
            Ok(connection) => {
                self.connection = Some(connection);
                info!(host = settings.host(), "connected to Home Assistant");
                self.resubscribe_tracked().await;
                true
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "could not connect to Home Assistant; check that 'websocket_api' is enabled"
                );
                false
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }

    async fn is_connected(&mut self) -> bool {
        match self.connection.as_mut() {
            Some(connection) => connection.probe().await,
            None => false,
        }
    }

    async fn apply_settings(&mut self, settings: HassSettings) {
        self.settings = Some(settings);
        self.disconnect().await;
        self.connect().await;
    }

    async fn initialize(&mut self, settings: HassSettings) {
        self.apply_settings(settings).await;
        if self.connection.is_none() || self.ensure_catalog().await.is_err() {
            return;
        }
        for button in self.host.buttons().await {
            let settings = self.host.button_settings(&button, PLUGIN_NAME).await;
            if let Some(settings) = settings {
                self.apply_button_settings(button, settings).await;
            }
        }
    }

    async fn domains(&mut self) -> Vec<String> {
        if !self.connect().await || self.ensure_catalog().await.is_err() {
            return Vec::new();
        }
        self.catalog.read().await.domains()
    }

    async fn entities(&mut self, domain: &str) -> Vec<String> {
        if domain.is_empty() || !self.connect().await || self.ensure_catalog().await.is_err() {
            return Vec::new();
        }
        self.catalog.read().await.entity_ids(domain)
    }

    async fn services(&mut self, domain: &str) -> Vec<String> {
        if domain.is_empty() || !self.connect().await {
            return Vec::new();
        }
        if self.services.is_none() {
            match self.load_services().await {
                Ok(services) => self.services = Some(services),
                Err(e) => {
                    error!(error = %e, "could not load the service catalog");
                    return Vec::new();
                }
            }
        }
        self.services
            .as_ref()
            .and_then(|services| services.get(domain))
            .cloned()
            .unwrap_or_default()
    }

    async fn state(&mut self, entity_id: &str) -> EntityState {
        if entity_id.is_empty() || !self.connect().await {
            return EntityState::off(entity_id);
        }
        match self.fetch_state(entity_id).await {
            Ok(state) => state,
            Err(e) => {
                error!(entity_id, error = %e, "could not retrieve state");
                EntityState::off(entity_id)
            }
        }
    }

    async fn call_service(&mut self, entity_id: &str, service: &str) {
        if entity_id.is_empty() || service.is_empty() || !self.connect().await {
            return;
        }
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if let Err(e) = connection
            .request(Request::call_service(entity_id, service))
            .await
        {
            error!(entity_id, service, error = %e, "service call failed");
        }
    }

    async fn icon(&mut self, entity_id: &str, service: &str, state: &str) -> String {
        if entity_id.is_empty() || !self.connect().await {
            return String::new();
        }
        // Best effort: without a catalog the resolver falls back to the
        // default glyph.
        let _ = self.ensure_catalog().await;
        let hint = self
            .catalog
            .read()
            .await
            .entry(entity_id)
            .map(|entry| entry.icon.clone())
            .unwrap_or_default();
        self.resolver.resolve(entity_id, service, state, &hint)
    }

    async fn track(&mut self, entity_id: &str, button: ButtonRef) {
        if entity_id.is_empty() || !self.connect().await || self.ensure_catalog().await.is_err() {
            return;
        }
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if let Err(e) = registry::track(connection, &self.catalog, entity_id, button).await {
            warn!(entity_id, error = %e, "could not subscribe to state changes");
        }
    }

    async fn untrack(&mut self, entity_id: &str, button: &ButtonRef) {
        if entity_id.is_empty() || !self.connect().await {
            return;
        }
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if let Err(e) = registry::untrack(connection, &self.catalog, entity_id, button).await {
            warn!(entity_id, error = %e, "could not unsubscribe from state changes");
        }
    }

    async fn apply_button_settings(&mut self, button: ButtonRef, settings: ButtonSettings) {
        if !self.connect().await {
            return;
        }

        if !settings.is_bound() {
            // The binding was removed; release the old entity and blank
            // the button.
            if let Some(old_entity) = self.button_entities.remove(&button) {
                self.untrack(&old_entity, &button).await;
                render::clear_button(&*self.host, &button).await;
                self.host.request_redraw().await;
            }
            return;
        }

        if self.ensure_catalog().await.is_err() {
            return;
        }
        let entity_id = settings.entity.clone();
        if self.catalog.read().await.entry(&entity_id).is_none() {
            // Entity no longer exists on the hub.
            debug!(entity = %entity_id, "button bound to unknown entity");
            return;
        }

        if let Some(old_entity) = self.button_entities.get(&button).cloned() {
            if old_entity != entity_id {
                self.untrack(&old_entity, &button).await;
            }
        }
        self.button_entities.insert(button.clone(), entity_id.clone());
        self.track(&entity_id, button.clone()).await;

        let state = self.fetch_state(&entity_id).await.unwrap_or_else(|e| {
            error!(entity = %entity_id, error = %e, "could not retrieve state");
            EntityState::off(&entity_id)
        });
        let hint = self
            .catalog
            .read()
            .await
            .entry(&entity_id)
            .map(|entry| entry.icon.clone())
            .unwrap_or_default();
        render::render_button(
            &*self.host,
            &self.resolver,
            &button,
            &settings.service,
            &state,
            &hint,
        )
        .await;
        self.host.request_redraw().await;
    }

    // ── Catalog plumbing ─────────────────────────────────────────────

    async fn ensure_catalog(&mut self) -> Result<(), Error> {
        if self.catalog.read().await.is_empty() {
            self.load_catalog().await?;
        }
        Ok(())
    }

    /// One `get_states` round trip; repopulates the catalog atomically or
    /// clears it on failure. Entities whose interest carried over get
    /// fresh subscriptions.
    async fn load_catalog(&mut self) -> Result<(), Error> {
        match self.fetch_all_states().await {
            Ok(states) => {
                let resubscribe = self.catalog.write().await.populate(states);
                self.subscribe_entities(resubscribe).await;
                Ok(())
            }
            Err(e) => {
                self.catalog.write().await.clear();
                error!(error = %e, "could not load domains and entities");
                Err(e)
            }
        }
    }

    async fn fetch_all_states(&mut self) -> Result<Vec<EntityState>, Error> {
        let connection = self.connection.as_mut().ok_or_else(not_connected)?;
        let result = connection.request(Request::GetStates).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn fetch_state(&mut self, entity_id: &str) -> Result<EntityState, Error> {
        let states = self.fetch_all_states().await?;
        Ok(states
            .into_iter()
            .find(|state| state.entity_id == entity_id)
            .unwrap_or_else(|| EntityState::off(entity_id)))
    }

    async fn load_services(&mut self) -> Result<HashMap<String, Vec<String>>, Error> {
        let connection = self.connection.as_mut().ok_or_else(not_connected)?;
        let result = connection.request(Request::GetServices).await?;
        Ok(catalog::parse_service_catalog(&result))
    }

    /// A new connection pair invalidated every old subscription id;
    /// subscribe every entity that still has interested buttons again.
    async fn resubscribe_tracked(&mut self) {
        let tracked = self.catalog.write().await.reset_subscriptions();
        if !tracked.is_empty() {
            self.subscribe_entities(tracked).await;
        }
    }

    async fn subscribe_entities(&mut self, entity_ids: Vec<String>) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        for entity_id in entity_ids {
            match connection.subscribe_trigger(&entity_id).await {
                Ok(subscription) => {
                    if let Some(entry) = self.catalog.write().await.entry_mut(&entity_id) {
                        entry.subscription = Some(subscription);
                    }
                }
                Err(e) => warn!(entity_id, error = %e, "could not re-subscribe"),
            }
        }
    }
}

fn not_connected() -> Error {
    Error::Connection("not connected".to_string())
}
