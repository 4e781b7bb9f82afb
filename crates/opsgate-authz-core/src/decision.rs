// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Combining policy matches into a single decision.
//!
//! Any matching deny wins regardless of priority. With no deny, any matching
//! allow permits. With no match at all the decision is deny.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::AttributeContext;
use crate::types::{PolicyEffect, PolicyId, UserId};

pub const NO_MATCHING_POLICIES: &str = "no matching policies";

/// A policy that was skipped because its condition could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyError {
	pub policy_id: PolicyId,
	pub message: String,
}

/// Outcome of evaluating every applicable policy for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
	pub allowed: bool,
	pub effect: PolicyEffect,
	pub reason: String,
	pub matched_policies: Vec<PolicyId>,
	pub deny_policies: Vec<PolicyId>,
	pub allow_policies: Vec<PolicyId>,
	pub context: AttributeContext,
	pub policies_evaluated: usize,
	pub errors: Vec<PolicyError>,
}

/// Append-only audit record of one policy matching a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvaluation {
	pub id: uuid::Uuid,
	pub policy_id: PolicyId,
	pub subject_id: UserId,
	pub action: String,
	pub resource_type: String,
	pub resource_id: Option<String>,
	pub effect: PolicyEffect,
	/// Whether this policy, on its own, permits the request.
	pub decision: bool,
	pub context: Value,
	pub duration_us: i64,
	pub evaluated_at: DateTime<Utc>,
}

/// Accumulates matches in evaluation order.
#[derive(Debug, Default)]
pub struct DecisionBuilder {
	matched: Vec<PolicyId>,
	deny: Vec<PolicyId>,
	allow: Vec<PolicyId>,
	evaluated: usize,
	errors: Vec<PolicyError>,
}

impl DecisionBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Counts a policy whose condition tree was evaluated (or attempted).
	pub fn evaluated(&mut self) {
		self.evaluated += 1;
	}

	pub fn matched(&mut self, policy_id: PolicyId, effect: PolicyEffect) {
		self.matched.push(policy_id);
		match effect {
			PolicyEffect::Deny => self.deny.push(policy_id),
			PolicyEffect::Allow => self.allow.push(policy_id),
		}
	}

	pub fn error(&mut self, policy_id: PolicyId, message: impl Into<String>) {
		self.errors.push(PolicyError {
			policy_id,
			message: message.into(),
		});
	}

	pub fn finish(self, context: AttributeContext) -> PolicyDecision {
		let (allowed, effect, reason) = combine(self.deny.len(), self.allow.len());
		PolicyDecision {
			allowed,
			effect,
			reason,
			matched_policies: self.matched,
			deny_policies: self.deny,
			allow_policies: self.allow,
			context,
			policies_evaluated: self.evaluated,
			errors: self.errors,
		}
	}
}

fn plural(n: usize) -> &'static str {
	if n == 1 {
		"policy"
	} else {
		"policies"
	}
}

/// Deny-overrides-allow over match counts.
pub fn combine(deny_count: usize, allow_count: usize) -> (bool, PolicyEffect, String) {
	if deny_count > 0 {
		let reason = format!("denied by {deny_count} {}", plural(deny_count));
		return (false, PolicyEffect::Deny, reason);
	}
	if allow_count > 0 {
		let reason = format!("allowed by {allow_count} {}", plural(allow_count));
		return (true, PolicyEffect::Allow, reason);
	}
	(false, PolicyEffect::Deny, NO_MATCHING_POLICIES.to_string())
}
