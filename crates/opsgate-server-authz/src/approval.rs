// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Multi-party approval of policy changes.
//!
//! A request is `pending` until it collects its workflow's quorum of
//! approvals or a single rejection. The vote that reaches quorum executes the
//! change on the policy in the same transaction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use opsgate_authz_core::{
	select_workflow, ApprovalDecision, ApprovalRequest, ApprovalRequestId, ApprovalRequestType,
	ApprovalStatus, ApprovalWorkflow, PolicyApproval, PolicyChangeLog, PolicyChanges, PolicyId,
	PolicyVersion, UserId, DEFAULT_REQUIRED_APPROVALS,
};
use opsgate_server_db::{ApprovalStore, PolicyStore, VoteRecord};
use serde_json::Value;

use crate::error::{AuthzError, Result};
use crate::rbac::RbacService;

/// Decides whether a user may vote on a request.
#[async_trait]
pub trait ApprovalEligibility: Send + Sync {
	async fn can_approve(&self, approver: &UserId, request: &ApprovalRequest) -> Result<bool>;
}

#[async_trait]
impl<F> ApprovalEligibility for F
where
	F: Fn(&UserId, &ApprovalRequest) -> bool + Send + Sync,
{
	async fn can_approve(&self, approver: &UserId, request: &ApprovalRequest) -> Result<bool> {
		Ok(self(approver, request))
	}
}

/// Eligible when the approver holds `permission` and did not file the request.
pub struct PermissionEligibility {
	rbac: RbacService,
	permission: String,
}

impl PermissionEligibility {
	pub fn new(rbac: RbacService, permission: impl Into<String>) -> Self {
		Self {
			rbac,
			permission: permission.into(),
		}
	}
}

#[async_trait]
impl ApprovalEligibility for PermissionEligibility {
	async fn can_approve(&self, approver: &UserId, request: &ApprovalRequest) -> Result<bool> {
		if *approver == request.requested_by {
			return Ok(false);
		}
		let permissions = self.rbac.resolve(approver, None).await?;
		Ok(permissions.allows(&self.permission))
	}
}

#[derive(Clone)]
pub struct ApprovalService {
	approvals: Arc<dyn ApprovalStore>,
	policies: Arc<dyn PolicyStore>,
	default_required_approvals: u32,
}

impl ApprovalService {
	pub fn new(approvals: Arc<dyn ApprovalStore>, policies: Arc<dyn PolicyStore>) -> Self {
		Self {
			approvals,
			policies,
			default_required_approvals: DEFAULT_REQUIRED_APPROVALS,
		}
	}

	/// Quorum used when no active workflow covers a request type.
	pub fn with_default_required_approvals(mut self, required: u32) -> Self {
		self.default_required_approvals = required.max(1);
		self
	}

	// =========================================================================
	// Workflows
	// =========================================================================

	#[tracing::instrument(skip(self))]
	pub async fn upsert_workflow(
		&self,
		name: &str,
		request_type: ApprovalRequestType,
		required_approvals: u32,
		priority: i32,
		active: bool,
	) -> Result<ApprovalWorkflow> {
		let name = name.trim();
		if name.is_empty() {
			return Err(AuthzError::InvalidInput(
				"workflow name must not be empty".to_string(),
			));
		}
		if required_approvals < 1 {
			return Err(AuthzError::InvalidInput(
				"required_approvals must be at least 1".to_string(),
			));
		}
		Ok(self
			.approvals
			.upsert_workflow(name, request_type, required_approvals, priority, active)
			.await?)
	}

	pub async fn list_workflows(
		&self,
		request_type: Option<ApprovalRequestType>,
	) -> Result<Vec<ApprovalWorkflow>> {
		Ok(self.approvals.list_workflows(request_type).await?)
	}

	// =========================================================================
	// Requests
	// =========================================================================

	/// Files a pending request against an existing policy.
	///
	/// # Errors
	/// - `AuthzError::NotFound` if the policy does not exist
	/// - `AuthzError::InvalidInput` if `create`/`update` changes are missing or
	///   invalid, or if another request type carries changes
	#[tracing::instrument(skip(self, notes, proposed_changes), fields(policy_id = %policy_id, request_type = %request_type))]
	pub async fn create_request(
		&self,
		policy_id: &PolicyId,
		request_type: ApprovalRequestType,
		requested_by: &UserId,
		notes: Option<String>,
		proposed_changes: Option<Value>,
	) -> Result<ApprovalRequest> {
		if self.policies.get_policy(policy_id).await?.is_none() {
			return Err(AuthzError::NotFound(format!("policy {policy_id}")));
		}

		match (request_type, &proposed_changes) {
			(ApprovalRequestType::Create | ApprovalRequestType::Update, Some(changes)) => {
				PolicyChanges::from_value(changes)?;
			}
			(ApprovalRequestType::Create | ApprovalRequestType::Update, None) => {
				return Err(AuthzError::InvalidInput(format!(
					"{request_type} requests require proposed changes"
				)));
			}
			(_, Some(_)) => {
				return Err(AuthzError::InvalidInput(format!(
					"{request_type} requests take no proposed changes"
				)));
			}
			(_, None) => {}
		}

		let workflows = self.approvals.list_workflows(Some(request_type)).await?;
		let required_approvals = select_workflow(&workflows, request_type)
			.map(|w| w.required_approvals)
			.unwrap_or(self.default_required_approvals);

		let request = ApprovalRequest {
			id: ApprovalRequestId::generate(),
			policy_id: *policy_id,
			request_type,
			status: ApprovalStatus::Pending,
			required_approvals,
			received_approvals: 0,
			proposed_changes,
			notes,
			requested_by: *requested_by,
			resolved_by: None,
			resolved_at: None,
			created_at: Utc::now(),
		};
		self.approvals.create_request(&request).await?;

		tracing::debug!(request_id = %request.id, required_approvals, "approval request filed");
		Ok(request)
	}

	pub async fn get_request(&self, id: &ApprovalRequestId) -> Result<ApprovalRequest> {
		self
			.approvals
			.get_request(id)
			.await?
			.ok_or_else(|| AuthzError::NotFound(format!("approval request {id}")))
	}

	pub async fn list_approvals(&self, request_id: &ApprovalRequestId) -> Result<Vec<PolicyApproval>> {
		Ok(self.approvals.list_approvals(request_id).await?)
	}

	/// Pending requests the approver is eligible to vote on, oldest first.
	#[tracing::instrument(skip(self, eligibility), fields(approver = %approver))]
	pub async fn list_pending(
		&self,
		approver: &UserId,
		eligibility: &dyn ApprovalEligibility,
	) -> Result<Vec<ApprovalRequest>> {
		let mut eligible = Vec::new();
		for request in self.approvals.list_pending().await? {
			if eligibility.can_approve(approver, &request).await? {
				eligible.push(request);
			}
		}
		Ok(eligible)
	}

	// =========================================================================
	// Votes
	// =========================================================================

	/// Records an approval; the vote reaching quorum executes the change.
	///
	/// # Errors
	/// - `AuthzError::NotFound` if the request (or, on execution, its policy) is missing
	/// - `AuthzError::Conflict` if the request is resolved or the approver already voted
	#[tracing::instrument(skip(self, comments), fields(request_id = %request_id, approver = %approver_id))]
	pub async fn approve(
		&self,
		request_id: &ApprovalRequestId,
		approver_id: &UserId,
		comments: Option<&str>,
	) -> Result<VoteRecord> {
		self
			.vote(request_id, approver_id, ApprovalDecision::Approve, comments)
			.await
	}

	/// Records a rejection, which resolves the request immediately.
	#[tracing::instrument(skip(self, comments), fields(request_id = %request_id, approver = %approver_id))]
	pub async fn reject(
		&self,
		request_id: &ApprovalRequestId,
		approver_id: &UserId,
		comments: Option<&str>,
	) -> Result<VoteRecord> {
		self
			.vote(request_id, approver_id, ApprovalDecision::Reject, comments)
			.await
	}

	async fn vote(
		&self,
		request_id: &ApprovalRequestId,
		approver_id: &UserId,
		decision: ApprovalDecision,
		comments: Option<&str>,
	) -> Result<VoteRecord> {
		let record = self
			.approvals
			.record_vote(request_id, approver_id, decision, comments)
			.await?;
		tracing::debug!(
			status = %record.request.status,
			received = record.request.received_approvals,
			required = record.request.required_approvals,
			"vote recorded"
		);
		Ok(record)
	}

	// =========================================================================
	// History
	// =========================================================================

	pub async fn create_version(
		&self,
		policy_id: &PolicyId,
		created_by: Option<&UserId>,
		summary: Option<&str>,
	) -> Result<PolicyVersion> {
		Ok(self
			.policies
			.create_version(policy_id, created_by, summary)
			.await?)
	}

	pub async fn list_versions(&self, policy_id: &PolicyId) -> Result<Vec<PolicyVersion>> {
		Ok(self.policies.list_versions(policy_id).await?)
	}

	pub async fn change_log(&self, policy_id: &PolicyId) -> Result<Vec<PolicyChangeLog>> {
		Ok(self.policies.change_log(policy_id).await?)
	}
}
