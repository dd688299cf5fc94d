// SPDX-License-Identifier: MIT OR Apache-2.0
//! Span events.
//!
//! A span event is a three-element record: intrinsics, user attributes,
//! and agent attributes. Intrinsics carry identity, timing, and
//! category-specific fields; the attribute maps carry whatever survived
//! destination filtering.

use serde_json::{Map, Value};

/// Span categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanCategory {
    /// Plain timed work.
    #[default]
    Generic,
    /// An outbound HTTP call.
    Http,
    /// A datastore operation.
    Datastore,
}

impl SpanCategory {
    /// The wire name of the category.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Http => "http",
            Self::Datastore => "datastore",
        }
    }
}

/// Agent attributes that never appear on span events; error details are
/// carried by dedicated intrinsics instead.
pub const IGNORED_AGENT_ATTRIBUTES: [&str; 4] =
    ["errorType", "errorMessage", "error.class", "error.message"];

/// One span event under construction.
#[derive(Debug, Clone, Default)]
pub struct SpanEvent {
    intrinsics: Map<String, Value>,
    user: Map<String, Value>,
    agent: Map<String, Value>,
}

impl SpanEvent {
    /// An empty event of type `Span`.
    pub fn new() -> Self {
        let mut event = Self::default();
        event.set_intrinsic("type", Value::from("Span"));
        event
    }

    /// Set one intrinsic field.
    pub fn set_intrinsic(&mut self, key: &str, value: Value) {
        self.intrinsics.insert(key.to_owned(), value);
    }

    /// Set an optional string intrinsic; `None` leaves the field absent.
    pub fn set_intrinsic_str(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.set_intrinsic(key, Value::from(value));
        }
    }

    /// Set the span category.
    pub fn set_category(&mut self, category: SpanCategory) {
        self.set_intrinsic("category", Value::from(category.as_str()));
    }

    /// Read an intrinsic back, mainly for tests.
    pub fn intrinsic(&self, key: &str) -> Option<&Value> {
        self.intrinsics.get(key)
    }

    /// Add one user attribute.
    pub fn set_attribute_user(&mut self, key: &str, value: Value) {
        self.user.insert(key.to_owned(), value);
    }

    /// Add one agent attribute, unless it is one of the ignored error
    /// fields.
    pub fn set_attribute_agent(&mut self, key: &str, value: Value) {
        if IGNORED_AGENT_ATTRIBUTES.contains(&key) {
            return;
        }
        self.agent.insert(key.to_owned(), value);
    }

    /// Set the error message carried by this span. Error fields bypass the
    /// agent-attribute filter; they are authoritative here.
    pub fn set_error_message(&mut self, message: &str) {
        self.agent
            .insert("error.message".to_owned(), Value::from(message));
    }

    /// Set the error class carried by this span.
    pub fn set_error_class(&mut self, class: &str) {
        self.agent
            .insert("error.class".to_owned(), Value::from(class));
    }

    /// Read a user attribute back, mainly for tests.
    pub fn attribute_user(&self, key: &str) -> Option<&Value> {
        self.user.get(key)
    }

    /// Read an agent attribute back, mainly for tests.
    pub fn attribute_agent(&self, key: &str) -> Option<&Value> {
        self.agent.get(key)
    }

    /// Number of user attributes.
    pub fn user_len(&self) -> usize {
        self.user.len()
    }

    /// Serialize as the wire's three-element record.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&[
            Value::Object(self.intrinsics.clone()),
            Value::Object(self.user.clone()),
            Value::Object(self.agent.clone()),
        ])
        .unwrap_or_else(|_| "[{},{},{}]".to_owned())
    }
}
