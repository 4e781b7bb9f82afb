// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Approval requests for policy lifecycle changes.
//!
//! A request is `pending` until it either collects `required_approvals`
//! distinct approvals or receives a single rejection. Both outcomes are final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
	ApprovalDecision, ApprovalId, ApprovalRequestId, ApprovalRequestType, ApprovalStatus, PolicyId,
	UserId, WorkflowId,
};

/// Approvals required when no workflow is configured for a request type.
pub const DEFAULT_REQUIRED_APPROVALS: u32 = 1;

/// Quorum configuration for one request type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
	pub id: WorkflowId,
	pub name: String,
	pub request_type: ApprovalRequestType,
	pub required_approvals: u32,
	pub priority: i32,
	pub active: bool,
	pub created_at: DateTime<Utc>,
}

/// Picks the highest-priority active workflow for `request_type`.
pub fn select_workflow(
	workflows: &[ApprovalWorkflow],
	request_type: ApprovalRequestType,
) -> Option<&ApprovalWorkflow> {
	workflows
		.iter()
		.filter(|w| w.active && w.request_type == request_type)
		.max_by(|a, b| {
			a.priority
				.cmp(&b.priority)
				.then_with(|| b.created_at.cmp(&a.created_at))
		})
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
	pub id: ApprovalRequestId,
	pub policy_id: PolicyId,
	pub request_type: ApprovalRequestType,
	pub status: ApprovalStatus,
	pub required_approvals: u32,
	pub received_approvals: u32,
	pub proposed_changes: Option<Value>,
	pub notes: Option<String>,
	pub requested_by: UserId,
	pub resolved_by: Option<UserId>,
	pub resolved_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
}

/// One approver's recorded decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyApproval {
	pub id: ApprovalId,
	pub request_id: ApprovalRequestId,
	pub approver_id: UserId,
	pub decision: ApprovalDecision,
	pub comments: Option<String>,
	pub created_at: DateTime<Utc>,
}

/// What a vote does to a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
	/// Still pending with the new approval count.
	Pending { received: u32 },
	/// Quorum reached; the requested change must be executed.
	Approved { received: u32 },
	/// Vetoed.
	Rejected,
}

/// Pure transition for one vote on a pending request.
pub fn tally(required: u32, received: u32, decision: ApprovalDecision) -> VoteOutcome {
	match decision {
		ApprovalDecision::Reject => VoteOutcome::Rejected,
		ApprovalDecision::Approve => {
			let received = received.saturating_add(1);
			if received >= required.max(1) {
				VoteOutcome::Approved { received }
			} else {
				VoteOutcome::Pending { received }
			}
		}
	}
}

/// Immutable snapshot of a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersion {
	pub id: uuid::Uuid,
	pub policy_id: PolicyId,
	pub version: i64,
	pub snapshot: Value,
	pub change_summary: Option<String>,
	pub created_by: Option<UserId>,
	pub created_at: DateTime<Utc>,
}

/// Append-only record of a policy mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyChangeLog {
	pub id: uuid::Uuid,
	pub policy_id: PolicyId,
	pub action: String,
	pub actor: Option<UserId>,
	pub diff: Value,
	pub reason: Option<String>,
	pub created_at: DateTime<Utc>,
}
