//! Lazily loaded snapshot of the hub's domains, entities, and services.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;

use crate::button::ButtonRef;
use crate::protocol::{domain_of, EntityState};

/// Per-entity bookkeeping.
///
/// Created on catalog load, mutated by the subscription registry and the
/// render pipeline, dropped only when a reload no longer reports the
/// entity.
#[derive(Debug, Clone, Default)]
pub(crate) struct EntityEntry {
    /// Last known state string.
    pub state: String,
    /// Icon hint from the entity's attributes (may carry an `mdi:` prefix).
    pub icon: String,
    /// Buttons currently interested in this entity.
    pub consumers: BTreeSet<ButtonRef>,
    /// Correlation id of the active push subscription; `None` means not
    /// subscribed.
    pub subscription: Option<u64>,
}

/// Domain-grouped entity map.
///
/// Either empty (not yet loaded) or fully populated for all domains at
/// once; [`populate`](Self::populate) replaces the whole snapshot and
/// failed loads [`clear`](Self::clear) it.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    domains: Vec<String>,
    entities: BTreeMap<String, BTreeMap<String, EntityEntry>>,
}

impl Catalog {
    pub(crate) fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.domains.clear();
        self.entities.clear();
    }

    /// Replace the whole snapshot with a fresh `get_states` result.
    ///
    /// Consumer interest carries over to entities that still exist; their
    /// old subscriptions died with whatever produced the reload, so the
    /// returned entity ids must be re-subscribed by the caller. Interest
    /// in entities the hub no longer reports is dropped.
    pub(crate) fn populate(&mut self, states: Vec<EntityState>) -> Vec<String> {
        let mut carried: HashMap<String, BTreeSet<ButtonRef>> = HashMap::new();
        for per_domain in self.entities.values_mut() {
            for (entity_id, entry) in per_domain.iter_mut() {
                if !entry.consumers.is_empty() {
                    carried.insert(entity_id.clone(), std::mem::take(&mut entry.consumers));
                }
            }
        }

        self.domains.clear();
        self.entities.clear();

        let mut resubscribe = Vec::new();
        for state in states {
            if state.entity_id.is_empty() {
                continue;
            }
            let domain = state.domain().to_string();
            if !self.domains.contains(&domain) {
                self.domains.push(domain.clone());
            }

            let consumers = carried.remove(&state.entity_id).unwrap_or_default();
            if !consumers.is_empty() {
                resubscribe.push(state.entity_id.clone());
            }
            self.entities.entry(domain).or_default().insert(
                state.entity_id,
                EntityEntry {
                    state: state.state,
                    icon: state.attributes.icon.unwrap_or_default(),
                    consumers,
                    subscription: None,
                },
            );
        }
        resubscribe
    }

    /// Domains in the order the hub reported them.
    pub(crate) fn domains(&self) -> Vec<String> {
        self.domains.clone()
    }

    /// Entity ids in one domain, sorted.
    pub(crate) fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.entities
            .get(domain)
            .map(|per_domain| per_domain.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn entry(&self, entity_id: &str) -> Option<&EntityEntry> {
        self.entities.get(domain_of(entity_id))?.get(entity_id)
    }

    pub(crate) fn entry_mut(&mut self, entity_id: &str) -> Option<&mut EntityEntry> {
        self.entities.get_mut(domain_of(entity_id))?.get_mut(entity_id)
    }

    /// Forget all subscription ids and report the entities that still have
    /// interest. Used when a new connection pair replaces an old one:
    /// every previous subscription id is dead, and each returned entity
    /// must be subscribed again.
    pub(crate) fn reset_subscriptions(&mut self) -> Vec<String> {
        let mut tracked = Vec::new();
        for per_domain in self.entities.values_mut() {
            for (entity_id, entry) in per_domain.iter_mut() {
                entry.subscription = None;
                if !entry.consumers.is_empty() {
                    tracked.push(entity_id.clone());
                }
            }
        }
        tracked
    }
}

/// Extract `domain → sorted service names` from a `get_services` result
/// payload (an object of objects).
pub(crate) fn parse_service_catalog(result: &Value) -> HashMap<String, Vec<String>> {
    let Some(domains) = result.as_object() else {
        return HashMap::new();
    };
    domains
        .iter()
        .map(|(domain, services)| {
            let names = services
                .as_object()
                .map(|s| s.keys().cloned().collect())
                .unwrap_or_default();
            (domain.clone(), names)
        })
        .collect()
}
