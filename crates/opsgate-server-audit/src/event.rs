// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Events carried by the audit queue.

use std::fmt;

use chrono::{DateTime, Utc};
use opsgate_authz_core::{PolicyEffect, PolicyEvaluation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
	PolicyAllowMatched,
	PolicyDenyMatched,
}

impl fmt::Display for AuditEventType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			AuditEventType::PolicyAllowMatched => "policy_allow_matched",
			AuditEventType::PolicyDenyMatched => "policy_deny_matched",
		};
		f.write_str(s)
	}
}

/// One queued audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
	pub id: Uuid,
	pub event_type: AuditEventType,
	pub queued_at: DateTime<Utc>,
	pub evaluation: PolicyEvaluation,
}

impl AuditEvent {
	/// Wraps the record of a policy that matched a request.
	pub fn policy_evaluation(evaluation: PolicyEvaluation) -> Self {
		let event_type = match evaluation.effect {
			PolicyEffect::Allow => AuditEventType::PolicyAllowMatched,
			PolicyEffect::Deny => AuditEventType::PolicyDenyMatched,
		};
		Self {
			id: Uuid::new_v4(),
			event_type,
			queued_at: Utc::now(),
			evaluation,
		}
	}
}
