//! Wire codec for the hub's websocket API.
//!
//! Envelopes are modeled as closed sum types and validated at the parse
//! boundary; downstream code pattern-matches instead of probing optional
//! fields. Unknown or malformed envelopes surface as [`Error::Protocol`]
//! and are skipped by the receive loops.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// The domain prefix of an entity id (`light` for `light.kitchen`).
pub fn domain_of(entity_id: &str) -> &str {
    entity_id.split('.').next().unwrap_or("")
}

// ── Correlation ids ──────────────────────────────────────────────────

/// Monotonically increasing correlation id source.
///
/// One counter per connection pair, starting at 1; reset only when a new
/// pair is established.
#[derive(Debug, Default)]
pub(crate) struct CorrelationIds {
    last: u64,
}

impl CorrelationIds {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

// ── Outbound messages ────────────────────────────────────────────────

/// Auth reply sent during the handshake. The only outbound message
/// without a correlation id.
#[derive(Debug, Serialize)]
pub(crate) struct AuthMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    access_token: &'a str,
}

impl<'a> AuthMessage<'a> {
    pub(crate) fn new(token: &'a str) -> Self {
        Self {
            kind: "auth",
            access_token: token,
        }
    }

    pub(crate) fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A correlated request envelope: `{"id": N, "type": ..., ...}`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct Envelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

impl Envelope {
    pub(crate) fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Commands this client issues.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Request {
    GetStates,
    GetServices,
    CallService {
        domain: String,
        service: String,
        target: ServiceTarget,
    },
    SubscribeTrigger {
        trigger: StateTrigger,
    },
    UnsubscribeEvents {
        subscription_id: u64,
    },
}

impl Request {
    /// Service call addressed at a single entity; the domain is derived
    /// from the entity id.
    pub(crate) fn call_service(entity_id: &str, service: &str) -> Self {
        Self::CallService {
            domain: domain_of(entity_id).to_string(),
            service: service.to_string(),
            target: ServiceTarget {
                entity_id: entity_id.to_string(),
            },
        }
    }

    /// State-change trigger subscription for one entity.
    pub(crate) fn subscribe_state_trigger(entity_id: &str) -> Self {
        Self::SubscribeTrigger {
            trigger: StateTrigger {
                platform: "state",
                entity_id: entity_id.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ServiceTarget {
    pub entity_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StateTrigger {
    pub platform: &'static str,
    pub entity_id: String,
}

// ── Inbound messages ─────────────────────────────────────────────────

/// Everything the hub sends on either channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "result")]
    CommandResult(ResultMessage),
    Event(EventMessage),
}

impl ServerMessage {
    pub(crate) fn parse(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("unreadable envelope: {e}")))
    }
}

/// Response to a correlated request.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResultMessage {
    pub id: u64,
    pub success: bool,
    #[serde(default)]
    pub result: Value,
}

/// Push event; for state-change triggers the new state sits under
/// `event.variables.trigger.to_state`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EventMessage {
    /// Correlation id of the subscription that produced the event.
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    event: EventBody,
}

impl EventMessage {
    /// The new entity state, when the event is a state-change trigger.
    pub(crate) fn into_state(self) -> Option<EntityState> {
        self.event.variables?.trigger?.to_state
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EventBody {
    #[serde(default)]
    variables: Option<TriggerVariables>,
}

#[derive(Debug, Clone, Deserialize)]
struct TriggerVariables {
    #[serde(default)]
    trigger: Option<TriggerFire>,
}

#[derive(Debug, Clone, Deserialize)]
struct TriggerFire {
    #[serde(default)]
    to_state: Option<EntityState>,
}

// ── Entity state payload ─────────────────────────────────────────────

/// State snapshot of one entity, as reported by `get_states` and by
/// state-change trigger events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub attributes: EntityAttributes,
}

impl EntityState {
    pub fn domain(&self) -> &str {
        domain_of(&self.entity_id)
    }

    /// Placeholder returned when the hub has no state for an entity.
    pub(crate) fn off(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            state: "off".to_string(),
            attributes: EntityAttributes::default(),
        }
    }
}

/// Attributes this core reads, with everything else retained untyped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityAttributes {
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub unit_of_measurement: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_monotonic_from_one() {
        let mut ids = CorrelationIds::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }

    #[test]
    fn get_states_envelope_shape() {
        let json = Envelope {
            id: 7,
            request: Request::GetStates,
        }
        .to_json()
        .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["type"], "get_states");
    }

    #[test]
    fn call_service_envelope_shape() {
        let json = Envelope {
            id: 3,
            request: Request::call_service("light.kitchen", "turn_on"),
        }
        .to_json()
        .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "call_service");
        assert_eq!(value["domain"], "light");
        assert_eq!(value["service"], "turn_on");
        assert_eq!(value["target"]["entity_id"], "light.kitchen");
    }

    #[test]
    fn subscribe_and_unsubscribe_envelope_shapes() {
        let sub = Envelope {
            id: 9,
            request: Request::subscribe_state_trigger("media_player.kitchen"),
        }
        .to_json()
        .unwrap();
        let value: Value = serde_json::from_str(&sub).unwrap();
        assert_eq!(value["type"], "subscribe_trigger");
        assert_eq!(value["trigger"]["platform"], "state");
        assert_eq!(value["trigger"]["entity_id"], "media_player.kitchen");

        let unsub = Envelope {
            id: 10,
            request: Request::UnsubscribeEvents { subscription_id: 9 },
        }
        .to_json()
        .unwrap();
        let value: Value = serde_json::from_str(&unsub).unwrap();
        assert_eq!(value["type"], "unsubscribe_events");
        assert_eq!(value["subscription_id"], 9);
    }

    #[test]
    fn auth_message_shape() {
        let json = AuthMessage::new("secret").to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "auth");
        assert_eq!(value["access_token"], "secret");
    }

    #[test]
    fn parse_handshake_messages() {
        assert!(matches!(
            ServerMessage::parse(r#"{"type":"auth_required","ha_version":"2026.1"}"#).unwrap(),
            ServerMessage::AuthRequired { .. }
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"type":"auth_ok"}"#).unwrap(),
            ServerMessage::AuthOk { .. }
        ));
        match ServerMessage::parse(r#"{"type":"auth_invalid","message":"bad token"}"#).unwrap() {
            ServerMessage::AuthInvalid { message } => {
                assert_eq!(message.as_deref(), Some("bad token"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_command_result() {
        let msg = ServerMessage::parse(r#"{"id":4,"type":"result","success":true,"result":[]}"#)
            .unwrap();
        match msg {
            ServerMessage::CommandResult(result) => {
                assert_eq!(result.id, 4);
                assert!(result.success);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_state_change_event() {
        let raw = serde_json::json!({
            "id": 12,
            "type": "event",
            "event": {
                "variables": {
                    "trigger": {
                        "platform": "state",
                        "to_state": {
                            "entity_id": "sensor.hallway",
                            "state": "21.5",
                            "attributes": {
                                "unit_of_measurement": "°C",
                                "friendly_name": "Hallway"
                            }
                        }
                    }
                }
            }
        });

        match ServerMessage::parse(&raw.to_string()).unwrap() {
            ServerMessage::Event(event) => {
                assert_eq!(event.id, 12);
                let state = event.into_state().unwrap();
                assert_eq!(state.entity_id, "sensor.hallway");
                assert_eq!(state.state, "21.5");
                assert_eq!(state.domain(), "sensor");
                assert_eq!(state.attributes.unit_of_measurement.as_deref(), Some("°C"));
                assert_eq!(state.attributes.extra["friendly_name"], "Hallway");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn event_without_trigger_yields_no_state() {
        let msg = ServerMessage::parse(r#"{"type":"event","event":{"data":{}}}"#).unwrap();
        match msg {
            ServerMessage::Event(event) => assert!(event.into_state().is_none()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        assert!(ServerMessage::parse("not json").is_err());
        assert!(ServerMessage::parse(r#"{"type":"mystery"}"#).is_err());
        assert!(ServerMessage::parse(r#"{"id":1,"type":"result"}"#).is_err());
    }

    #[test]
    fn domain_of_splits_entity_ids() {
        assert_eq!(domain_of("light.kitchen"), "light");
        assert_eq!(domain_of("media_player.living_room"), "media_player");
        assert_eq!(domain_of(""), "");
    }
}
