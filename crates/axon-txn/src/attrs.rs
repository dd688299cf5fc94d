// SPDX-License-Identifier: MIT OR Apache-2.0
//! User and agent attributes with per-destination routing.

use serde_json::{Map, Value};

/// Destination: the transaction event.
pub const DESTINATION_TXN_EVENT: u32 = 1 << 0;
/// Destination: the transaction trace.
pub const DESTINATION_TXN_TRACE: u32 = 1 << 1;
/// Destination: error records.
pub const DESTINATION_ERROR: u32 = 1 << 2;
/// Destination: browser monitoring payloads.
pub const DESTINATION_BROWSER: u32 = 1 << 3;
/// Destination: span events.
pub const DESTINATION_SPAN: u32 = 1 << 4;
/// Destination: log events.
pub const DESTINATION_LOG: u32 = 1 << 5;
/// All destinations.
pub const DESTINATION_ALL: u32 = DESTINATION_TXN_EVENT
    | DESTINATION_TXN_TRACE
    | DESTINATION_ERROR
    | DESTINATION_BROWSER
    | DESTINATION_SPAN
    | DESTINATION_LOG;

/// Cap on user attributes per attribute set.
pub const USER_ATTRIBUTE_LIMIT: usize = 64;

/// Destination filtering configured for a transaction.
///
/// Fine-grained include/exclude rule evaluation happens outside the core;
/// the config the core consumes is the already-evaluated destination mask.
#[derive(Debug, Clone, Copy)]
pub struct AttributeConfig {
    /// Destinations attributes may be routed to at all.
    pub enabled_destinations: u32,
}

impl Default for AttributeConfig {
    fn default() -> Self {
        Self {
            enabled_destinations: DESTINATION_ALL,
        }
    }
}

#[derive(Debug, Clone)]
struct Attribute {
    name: String,
    value: Value,
    destinations: u32,
}

/// An ordered set of user and agent attributes.
#[derive(Debug, Clone, Default)]
pub struct AttributeSet {
    config: AttributeConfig,
    user: Vec<Attribute>,
    agent: Vec<Attribute>,
}

impl AttributeSet {
    /// An empty set filtered by `config`.
    pub fn new(config: AttributeConfig) -> Self {
        Self {
            config,
            user: Vec::new(),
            agent: Vec::new(),
        }
    }

    /// Add or replace a user attribute. Fails when the set is full or the
    /// requested destinations are all disabled.
    pub fn user_add(&mut self, destinations: u32, name: &str, value: Value) -> bool {
        let destinations = destinations & self.config.enabled_destinations;
        if destinations == 0 {
            return false;
        }

        if let Some(existing) = self.user.iter_mut().find(|a| a.name == name) {
            existing.value = value;
            existing.destinations = destinations;
            return true;
        }
        if self.user.len() >= USER_ATTRIBUTE_LIMIT {
            return false;
        }
        self.user.push(Attribute {
            name: name.to_owned(),
            value,
            destinations,
        });
        true
    }

    /// Add or replace an agent attribute.
    pub fn agent_add(&mut self, destinations: u32, name: &str, value: Value) -> bool {
        let destinations = destinations & self.config.enabled_destinations;
        if destinations == 0 {
            return false;
        }

        if let Some(existing) = self.agent.iter_mut().find(|a| a.name == name) {
            existing.value = value;
            existing.destinations = destinations;
        } else {
            self.agent.push(Attribute {
                name: name.to_owned(),
                value,
                destinations,
            });
        }
        true
    }

    /// Remove a user attribute by name; returns whether one was removed.
    pub fn user_remove(&mut self, name: &str) -> bool {
        let before = self.user.len();
        self.user.retain(|a| a.name != name);
        before != self.user.len()
    }

    /// Whether a user attribute with `name` exists.
    pub fn user_exists(&self, name: &str) -> bool {
        self.user.iter().any(|a| a.name == name)
    }

    /// User attributes routed to `destination`, as a JSON object.
    pub fn user_to_map(&self, destination: u32) -> Map<String, Value> {
        attributes_to_map(&self.user, destination)
    }

    /// Agent attributes routed to `destination`, as a JSON object.
    pub fn agent_to_map(&self, destination: u32) -> Map<String, Value> {
        attributes_to_map(&self.agent, destination)
    }

    /// Number of user attributes in the set.
    pub fn user_len(&self) -> usize {
        self.user.len()
    }
}

fn attributes_to_map(attributes: &[Attribute], destination: u32) -> Map<String, Value> {
    attributes
        .iter()
        .filter(|a| a.destinations & destination != 0)
        .map(|a| (a.name.clone(), a.value.clone()))
        .collect()
}
