// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Attribute definitions and time-bounded assignments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::{AssignmentId, AttributeDataType, AttributeId, AttributeScope, UserId};

/// A named, typed attribute definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
	pub id: AttributeId,
	pub name: String,
	pub scope: AttributeScope,
	pub data_type: AttributeDataType,
	pub description: Option<String>,
	pub active: bool,
	pub created_at: DateTime<Utc>,
}

/// The thing an attribute value is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeSubject {
	User(UserId),
	Resource {
		resource_type: String,
		resource_id: String,
	},
}

impl AttributeSubject {
	pub fn resource(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
		Self::Resource {
			resource_type: resource_type.into(),
			resource_id: resource_id.into(),
		}
	}

	/// The attribute scope a definition must have to attach to this subject.
	pub fn scope(&self) -> AttributeScope {
		match self {
			AttributeSubject::User(_) => AttributeScope::User,
			AttributeSubject::Resource { .. } => AttributeScope::Resource,
		}
	}
}

impl fmt::Display for AttributeSubject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AttributeSubject::User(id) => write!(f, "user:{id}"),
			AttributeSubject::Resource {
				resource_type,
				resource_id,
			} => write!(f, "{resource_type}:{resource_id}"),
		}
	}
}

/// One row of assignment history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeAssignment {
	pub id: AssignmentId,
	pub subject: AttributeSubject,
	pub attribute_id: AttributeId,
	pub attribute_name: String,
	pub data_type: AttributeDataType,
	pub value: String,
	pub valid_from: DateTime<Utc>,
	pub valid_until: Option<DateTime<Utc>>,
	pub active: bool,
	pub assigned_by: Option<UserId>,
	pub created_at: DateTime<Utc>,
}

impl AttributeAssignment {
	/// Returns true if the row is active and its validity window contains `now`.
	///
	/// The window is half-open: `valid_from <= now < valid_until`.
	pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
		self.active && is_within_window(self.valid_from, self.valid_until, now)
	}

	/// The value converted to JSON according to the declared data type.
	pub fn typed_value(&self) -> Value {
		typed_value(self.data_type, &self.value)
	}
}

/// Returns true if `now` lies in `[from, until)`; an unset `until` is open-ended.
pub fn is_within_window(
	from: DateTime<Utc>,
	until: Option<DateTime<Utc>>,
	now: DateTime<Utc>,
) -> bool {
	from <= now && until.map_or(true, |until| until > now)
}

/// Converts a stored attribute value into a JSON value for condition evaluation.
///
/// Values that fail to parse as their declared type fall back to strings, so a
/// malformed number still compares by string equality rather than vanishing.
pub fn typed_value(data_type: AttributeDataType, raw: &str) -> Value {
	match data_type {
		AttributeDataType::String => Value::String(raw.to_string()),
		AttributeDataType::Number => raw
			.trim()
			.parse::<f64>()
			.ok()
			.and_then(serde_json::Number::from_f64)
			.map(Value::Number)
			.unwrap_or_else(|| Value::String(raw.to_string())),
		AttributeDataType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
			"true" | "1" | "yes" => Value::Bool(true),
			"false" | "0" | "no" => Value::Bool(false),
			_ => Value::String(raw.to_string()),
		},
		AttributeDataType::List => match serde_json::from_str::<Value>(raw) {
			Ok(Value::Array(items)) => Value::Array(items),
			_ => Value::Array(
				raw
					.split(',')
					.map(str::trim)
					.filter(|s| !s.is_empty())
					.map(|s| Value::String(s.to_string()))
					.collect(),
			),
		},
	}
}
