// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! ABAC policy records, creation input and change sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::attribute::is_within_window;
use crate::condition::{ConditionError, ConditionNode};
use crate::permission::target_matches;
use crate::types::{BusinessVerticalId, PolicyEffect, PolicyId, PolicyStatus, UserId};

/// A stored policy.
///
/// `condition` is kept as raw JSON: a stored tree that no longer parses must
/// degrade that one policy at evaluation time instead of failing the load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
	pub id: PolicyId,
	pub name: String,
	pub description: Option<String>,
	pub effect: PolicyEffect,
	pub priority: i32,
	pub status: PolicyStatus,
	pub valid_from: Option<DateTime<Utc>>,
	pub valid_until: Option<DateTime<Utc>>,
	pub actions: Vec<String>,
	pub resource_types: Vec<String>,
	pub condition: Value,
	pub business_vertical_id: Option<BusinessVerticalId>,
	pub created_by: Option<UserId>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Policy {
	/// Returns true if the policy is active and inside its validity window.
	pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
		if self.status != PolicyStatus::Active {
			return false;
		}
		let from = self.valid_from.unwrap_or(DateTime::<Utc>::MIN_UTC);
		is_within_window(from, self.valid_until, now)
	}

	/// Returns true if the action and resource-type lists admit the request.
	pub fn applies_to(&self, action: &str, resource_type: &str) -> bool {
		target_matches(&self.actions, action) && target_matches(&self.resource_types, resource_type)
	}

	/// Returns true if the policy may apply to a request scoped to `vertical`.
	///
	/// Unscoped policies always apply. Scoped policies are excluded only when
	/// the request names a different vertical.
	pub fn in_scope(&self, vertical: Option<BusinessVerticalId>) -> bool {
		match (self.business_vertical_id, vertical) {
			(Some(own), Some(requested)) => own == requested,
			_ => true,
		}
	}

	/// Parses the stored condition tree.
	pub fn parse_condition(&self) -> Result<ConditionNode, ConditionError> {
		ConditionNode::parse(&self.condition)
	}

	/// JSON snapshot used for version history.
	pub fn snapshot(&self) -> Value {
		serde_json::to_value(self).unwrap_or(Value::Null)
	}
}

/// Evaluation order: priority descending, then oldest first, then id.
pub fn evaluation_order(a: &Policy, b: &Policy) -> Ordering {
	b.priority
		.cmp(&a.priority)
		.then_with(|| a.created_at.cmp(&b.created_at))
		.then_with(|| a.id.cmp(&b.id))
}

/// Errors raised while validating policy input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyInputError {
	#[error("policy name must not be empty")]
	EmptyName,

	#[error("valid_until must be later than valid_from")]
	InvalidWindow,

	#[error("invalid condition: {0}")]
	Condition(#[from] ConditionError),

	#[error("invalid proposed changes: {0}")]
	Changes(String),
}

/// Input for creating a policy. New policies always start as `draft`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPolicy {
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	pub effect: PolicyEffect,
	#[serde(default)]
	pub priority: i32,
	#[serde(default)]
	pub valid_from: Option<DateTime<Utc>>,
	#[serde(default)]
	pub valid_until: Option<DateTime<Utc>>,
	#[serde(default)]
	pub actions: Vec<String>,
	#[serde(default)]
	pub resource_types: Vec<String>,
	pub condition: ConditionNode,
	#[serde(default)]
	pub business_vertical_id: Option<BusinessVerticalId>,
}

impl NewPolicy {
	pub fn validate(&self) -> Result<(), PolicyInputError> {
		if self.name.trim().is_empty() {
			return Err(PolicyInputError::EmptyName);
		}
		check_window(self.valid_from, self.valid_until)
	}

	/// Builds the stored record.
	pub fn into_policy(self, created_by: Option<UserId>, now: DateTime<Utc>) -> Policy {
		Policy {
			id: PolicyId::generate(),
			name: self.name.trim().to_string(),
			description: self.description,
			effect: self.effect,
			priority: self.priority,
			status: PolicyStatus::Draft,
			valid_from: self.valid_from,
			valid_until: self.valid_until,
			actions: self.actions,
			resource_types: self.resource_types,
			condition: self.condition.to_value(),
			business_vertical_id: self.business_vertical_id,
			created_by,
			created_at: now,
			updated_at: now,
		}
	}
}

fn check_window(
	from: Option<DateTime<Utc>>,
	until: Option<DateTime<Utc>>,
) -> Result<(), PolicyInputError> {
	match (from, until) {
		(Some(from), Some(until)) if until <= from => Err(PolicyInputError::InvalidWindow),
		_ => Ok(()),
	}
}

/// A partial update. Unset fields are left alone.
///
/// This is also the shape of `proposed_changes` on create and update approval
/// requests; unknown fields are rejected so a typo cannot silently no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyChanges {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub effect: Option<PolicyEffect>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub priority: Option<i32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub status: Option<PolicyStatus>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub valid_from: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub valid_until: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub actions: Option<Vec<String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub resource_types: Option<Vec<String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub condition: Option<ConditionNode>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub business_vertical_id: Option<BusinessVerticalId>,
}

impl PolicyChanges {
	/// Parses and validates a proposed-changes document.
	pub fn from_value(value: &Value) -> Result<Self, PolicyInputError> {
		let changes: PolicyChanges = serde_json::from_value(value.clone())
			.map_err(|e| PolicyInputError::Changes(e.to_string()))?;
		changes.validate()?;
		Ok(changes)
	}

	pub fn is_empty(&self) -> bool {
		*self == PolicyChanges::default()
	}

	pub fn validate(&self) -> Result<(), PolicyInputError> {
		if self.is_empty() {
			return Err(PolicyInputError::Changes("no fields to change".to_string()));
		}
		if let Some(name) = &self.name {
			if name.trim().is_empty() {
				return Err(PolicyInputError::EmptyName);
			}
		}
		check_window(self.valid_from, self.valid_until)
	}

	/// Applies the changes in place and returns a `{field: {from, to}}` diff.
	pub fn apply(&self, policy: &mut Policy, now: DateTime<Utc>) -> Result<Value, PolicyInputError> {
		let mut diff = Map::new();

		fn record<T: Serialize + PartialEq>(
			diff: &mut Map<String, Value>,
			field: &str,
			current: &mut T,
			next: T,
		) {
			if *current != next {
				diff.insert(
					field.to_string(),
					serde_json::json!({
						"from": serde_json::to_value(&*current).unwrap_or(Value::Null),
						"to": serde_json::to_value(&next).unwrap_or(Value::Null),
					}),
				);
				*current = next;
			}
		}

		if let Some(name) = &self.name {
			record(&mut diff, "name", &mut policy.name, name.trim().to_string());
		}
		if let Some(description) = &self.description {
			record(&mut diff, "description", &mut policy.description, Some(description.clone()));
		}
		if let Some(effect) = self.effect {
			record(&mut diff, "effect", &mut policy.effect, effect);
		}
		if let Some(priority) = self.priority {
			record(&mut diff, "priority", &mut policy.priority, priority);
		}
		if let Some(status) = self.status {
			record(&mut diff, "status", &mut policy.status, status);
		}
		if let Some(from) = self.valid_from {
			record(&mut diff, "valid_from", &mut policy.valid_from, Some(from));
		}
		if let Some(until) = self.valid_until {
			record(&mut diff, "valid_until", &mut policy.valid_until, Some(until));
		}
		if let Some(actions) = &self.actions {
			record(&mut diff, "actions", &mut policy.actions, actions.clone());
		}
		if let Some(types) = &self.resource_types {
			record(&mut diff, "resource_types", &mut policy.resource_types, types.clone());
		}
		if let Some(condition) = &self.condition {
			record(&mut diff, "condition", &mut policy.condition, condition.to_value());
		}
		if let Some(vertical) = self.business_vertical_id {
			record(
				&mut diff,
				"business_vertical_id",
				&mut policy.business_vertical_id,
				Some(vertical),
			);
		}

		check_window(policy.valid_from, policy.valid_until)?;
		if !diff.is_empty() {
			policy.updated_at = now;
		}
		Ok(Value::Object(diff))
	}
}

/// Filter for policy listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFilter {
	pub status: Option<PolicyStatus>,
	pub effect: Option<PolicyEffect>,
	pub business_vertical_id: Option<BusinessVerticalId>,
	/// Case-insensitive substring of the name.
	pub name_contains: Option<String>,
}
