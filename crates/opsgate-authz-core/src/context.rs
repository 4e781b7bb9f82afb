// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The flat key/value context condition trees are evaluated against.
//!
//! Keys are dotted (`user.department`, `resource.site`, `environment.hour`).
//! A context is assembled in a fixed order: caller environment, then user
//! attributes, then resource attributes, then synthesized request and time
//! keys. Later inserts replace earlier ones, so the synthesized keys can never
//! be spoofed by the caller; every replaced key is remembered in
//! [`AttributeContext::shadowed`] and logged at debug.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::UserId;

pub const USER_PREFIX: &str = "user.";
pub const RESOURCE_PREFIX: &str = "resource.";
pub const ENVIRONMENT_PREFIX: &str = "environment.";

/// Attribute values keyed by dotted name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeContext {
	values: BTreeMap<String, Value>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	shadowed: Vec<String>,
}

impl AttributeContext {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts `value` under `key`, returning the value it replaced.
	pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
		let key = key.into();
		let previous = self.values.insert(key.clone(), value);
		if previous.is_some() {
			tracing::debug!(key = %key, "context key overridden");
			if !self.shadowed.contains(&key) {
				self.shadowed.push(key);
			}
		}
		previous
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.values.get(key)
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.values.contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	/// Keys whose first value was replaced by a later insert.
	pub fn shadowed(&self) -> &[String] {
		&self.shadowed
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
		self.values.iter()
	}

	/// Snapshot of the values as a JSON object, for audit records.
	pub fn to_json(&self) -> Value {
		Value::Object(
			self
				.values
				.iter()
				.map(|(k, v)| (k.clone(), v.clone()))
				.collect(),
		)
	}
}

/// Inputs for [`build_context`].
#[derive(Debug, Clone)]
pub struct ContextInputs<'a> {
	pub environment: &'a BTreeMap<String, Value>,
	pub user_attributes: &'a BTreeMap<String, Value>,
	pub resource_attributes: &'a BTreeMap<String, Value>,
	pub user_id: UserId,
	pub action: &'a str,
	pub resource_type: &'a str,
	pub resource_id: Option<&'a str>,
	pub now: DateTime<Utc>,
}

/// Lowercase English day name used for `environment.day_of_week`.
pub fn day_name(day: Weekday) -> &'static str {
	match day {
		Weekday::Mon => "monday",
		Weekday::Tue => "tuesday",
		Weekday::Wed => "wednesday",
		Weekday::Thu => "thursday",
		Weekday::Fri => "friday",
		Weekday::Sat => "saturday",
		Weekday::Sun => "sunday",
	}
}

fn environment_key(key: &str) -> String {
	if key.starts_with(ENVIRONMENT_PREFIX) {
		key.to_string()
	} else {
		format!("{ENVIRONMENT_PREFIX}{key}")
	}
}

/// Assembles the evaluation context for one request.
pub fn build_context(inputs: &ContextInputs<'_>) -> AttributeContext {
	let mut ctx = AttributeContext::new();

	for (key, value) in inputs.environment {
		ctx.insert(environment_key(key), value.clone());
	}
	for (name, value) in inputs.user_attributes {
		ctx.insert(format!("{USER_PREFIX}{name}"), value.clone());
	}
	for (name, value) in inputs.resource_attributes {
		ctx.insert(format!("{RESOURCE_PREFIX}{name}"), value.clone());
	}

	ctx.insert("user.id", Value::String(inputs.user_id.to_string()));
	ctx.insert("action", Value::String(inputs.action.to_string()));
	ctx.insert("resource.type", Value::String(inputs.resource_type.to_string()));
	if let Some(resource_id) = inputs.resource_id {
		ctx.insert("resource.id", Value::String(resource_id.to_string()));
	}

	let now = inputs.now;
	ctx.insert("environment.hour", Value::from(now.hour()));
	ctx.insert(
		"environment.day_of_week",
		Value::String(day_name(now.weekday()).to_string()),
	);
	ctx.insert(
		"environment.date",
		Value::String(now.format("%Y-%m-%d").to_string()),
	);
	ctx.insert("environment.timestamp", Value::String(now.to_rfc3339()));

	ctx
}
