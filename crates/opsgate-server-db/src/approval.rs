// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Approval repository: workflows, requests, votes and quorum execution.
//!
//! [`ApprovalRepository::record_vote`] is the one place a request changes
//! state. The vote row, the counters, the request status and (on quorum) the
//! policy mutation with its version snapshot and change log are written in a
//! single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opsgate_authz_core::{
	tally, ApprovalDecision, ApprovalId, ApprovalRequest, ApprovalRequestId, ApprovalRequestType,
	ApprovalStatus, ApprovalWorkflow, PolicyApproval, PolicyChanges, PolicyStatus, UserId,
	VoteOutcome, WorkflowId,
};
use serde_json::{json, Value};
use sqlx::{sqlite::SqlitePool, Row, SqliteConnection};

use crate::error::{conflict_on_unique, DbError};
use crate::policy::{fetch_policy, insert_change_log, insert_version, remove_policy, write_policy};
use crate::row::{opt_ts, parse_enum, parse_id, parse_opt_id, parse_opt_timestamp, parse_timestamp};

pub const REQUEST_ALREADY_RESOLVED: &str = "request already resolved";
pub const APPROVER_ALREADY_VOTED: &str = "approver already voted";

const REQUEST_COLUMNS: &str = "id, policy_id, request_type, status, required_approvals, \
	received_approvals, proposed_changes, notes, requested_by, resolved_by, resolved_at, created_at";

/// Result of a successfully recorded vote.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteRecord {
	pub request: ApprovalRequest,
	pub approval: PolicyApproval,
	pub outcome: VoteOutcome,
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
	async fn upsert_workflow(
		&self,
		name: &str,
		request_type: ApprovalRequestType,
		required_approvals: u32,
		priority: i32,
		active: bool,
	) -> Result<ApprovalWorkflow, DbError>;
	async fn list_workflows(
		&self,
		request_type: Option<ApprovalRequestType>,
	) -> Result<Vec<ApprovalWorkflow>, DbError>;
	async fn create_request(&self, request: &ApprovalRequest) -> Result<(), DbError>;
	async fn get_request(&self, id: &ApprovalRequestId) -> Result<Option<ApprovalRequest>, DbError>;
	async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, DbError>;
	async fn list_approvals(&self, request_id: &ApprovalRequestId)
		-> Result<Vec<PolicyApproval>, DbError>;
	async fn record_vote(
		&self,
		request_id: &ApprovalRequestId,
		approver_id: &UserId,
		decision: ApprovalDecision,
		comments: Option<&str>,
	) -> Result<VoteRecord, DbError>;
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest, DbError> {
	let id: String = row.get("id");
	let policy_id: String = row.get("policy_id");
	let request_type: String = row.get("request_type");
	let status: String = row.get("status");
	let required: i64 = row.get("required_approvals");
	let received: i64 = row.get("received_approvals");
	let proposed_changes: Option<String> = row.get("proposed_changes");
	let requested_by: String = row.get("requested_by");
	let created_at: String = row.get("created_at");

	Ok(ApprovalRequest {
		id: parse_id(&id, "request id")?,
		policy_id: parse_id(&policy_id, "policy id")?,
		request_type: parse_enum(&request_type)?,
		status: parse_enum(&status)?,
		required_approvals: u32::try_from(required)
			.map_err(|e| DbError::Internal(format!("Invalid required_approvals: {e}")))?,
		received_approvals: u32::try_from(received)
			.map_err(|e| DbError::Internal(format!("Invalid received_approvals: {e}")))?,
		proposed_changes: proposed_changes
			.map(|c| serde_json::from_str::<Value>(&c))
			.transpose()?,
		notes: row.get("notes"),
		requested_by: parse_id(&requested_by, "requested_by")?,
		resolved_by: parse_opt_id(row.get("resolved_by"), "resolved_by")?,
		resolved_at: parse_opt_timestamp(row.get("resolved_at"), "resolved_at")?,
		created_at: parse_timestamp(&created_at, "created_at")?,
	})
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<PolicyApproval, DbError> {
	let id: String = row.get("id");
	let request_id: String = row.get("request_id");
	let approver_id: String = row.get("approver_id");
	let decision: String = row.get("decision");
	let created_at: String = row.get("created_at");
	Ok(PolicyApproval {
		id: parse_id(&id, "approval id")?,
		request_id: parse_id(&request_id, "request id")?,
		approver_id: parse_id(&approver_id, "approver id")?,
		decision: parse_enum(&decision)?,
		comments: row.get("comments"),
		created_at: parse_timestamp(&created_at, "created_at")?,
	})
}

fn row_to_workflow(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalWorkflow, DbError> {
	let id: String = row.get("id");
	let request_type: String = row.get("request_type");
	let required: i64 = row.get("required_approvals");
	let active: i32 = row.get("active");
	let created_at: String = row.get("created_at");
	Ok(ApprovalWorkflow {
		id: parse_id(&id, "workflow id")?,
		name: row.get("name"),
		request_type: parse_enum(&request_type)?,
		required_approvals: u32::try_from(required)
			.map_err(|e| DbError::Internal(format!("Invalid required_approvals: {e}")))?,
		priority: row.get("priority"),
		active: active != 0,
		created_at: parse_timestamp(&created_at, "created_at")?,
	})
}

/// Apply an approved request to its policy on the caller's transaction.
async fn execute_request(
	conn: &mut SqliteConnection,
	request: &ApprovalRequest,
	approver_id: &UserId,
	now: DateTime<Utc>,
) -> Result<(), DbError> {
	let reason = request.notes.as_deref();
	let mut policy = fetch_policy(conn, &request.policy_id)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("policy {}", request.policy_id)))?;

	let (action, diff) = match request.request_type {
		ApprovalRequestType::Delete => {
			remove_policy(conn, &policy.id).await?;
			insert_change_log(conn, &policy.id, "delete", Some(approver_id), &policy.snapshot(), reason)
				.await?;
			return Ok(());
		}
		ApprovalRequestType::Activate | ApprovalRequestType::Deactivate => {
			let target = if request.request_type == ApprovalRequestType::Activate {
				PolicyStatus::Active
			} else {
				PolicyStatus::Inactive
			};
			let diff = json!({ "status": { "from": policy.status, "to": target } });
			policy.status = target;
			policy.updated_at = now;
			(request.request_type.as_str(), diff)
		}
		ApprovalRequestType::Create | ApprovalRequestType::Update => {
			let raw = request.proposed_changes.as_ref().ok_or_else(|| {
				DbError::Internal(format!("request {} carries no proposed changes", request.id))
			})?;
			let mut changes = PolicyChanges::from_value(raw)
				.map_err(|e| DbError::Internal(format!("request {}: {e}", request.id)))?;
			if request.request_type == ApprovalRequestType::Create && changes.status.is_none() {
				changes.status = Some(PolicyStatus::Active);
			}
			let diff = changes
				.apply(&mut policy, now)
				.map_err(|e| DbError::Internal(format!("request {}: {e}", request.id)))?;
			(request.request_type.as_str(), diff)
		}
	};

	write_policy(conn, &policy).await?;
	insert_version(conn, &policy, Some(approver_id), reason).await?;
	insert_change_log(conn, &policy.id, action, Some(approver_id), &diff, reason).await?;
	Ok(())
}

#[derive(Clone)]
pub struct ApprovalRepository {
	pool: SqlitePool,
}

impl ApprovalRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	// =========================================================================
	// Workflows
	// =========================================================================

	/// Create or replace the workflow named `name`.
	#[tracing::instrument(skip(self), fields(workflow = %name, request_type = %request_type))]
	pub async fn upsert_workflow(
		&self,
		name: &str,
		request_type: ApprovalRequestType,
		required_approvals: u32,
		priority: i32,
		active: bool,
	) -> Result<ApprovalWorkflow, DbError> {
		sqlx::query(
			r#"
			INSERT INTO policy_approval_workflows
				(id, name, request_type, required_approvals, priority, active, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT (name) DO UPDATE SET
				request_type = excluded.request_type,
				required_approvals = excluded.required_approvals,
				priority = excluded.priority,
				active = excluded.active
			"#,
		)
		.bind(WorkflowId::generate().to_string())
		.bind(name)
		.bind(request_type.as_str())
		.bind(i64::from(required_approvals))
		.bind(priority)
		.bind(active as i32)
		.bind(Utc::now().to_rfc3339())
		.execute(&self.pool)
		.await?;

		let row = sqlx::query(
			r#"
			SELECT id, name, request_type, required_approvals, priority, active, created_at
			FROM policy_approval_workflows
			WHERE name = ?
			"#,
		)
		.bind(name)
		.fetch_one(&self.pool)
		.await?;

		let workflow = row_to_workflow(&row)?;
		tracing::debug!(workflow_id = %workflow.id, "approval workflow saved");
		Ok(workflow)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_workflows(
		&self,
		request_type: Option<ApprovalRequestType>,
	) -> Result<Vec<ApprovalWorkflow>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT id, name, request_type, required_approvals, priority, active, created_at
			FROM policy_approval_workflows
			WHERE (?1 IS NULL OR request_type = ?1)
			ORDER BY priority DESC, created_at ASC
			"#,
		)
		.bind(request_type.map(|t| t.as_str()))
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_workflow).collect()
	}

	// =========================================================================
	// Requests
	// =========================================================================

	#[tracing::instrument(skip(self, request), fields(request_id = %request.id, policy_id = %request.policy_id))]
	pub async fn create_request(&self, request: &ApprovalRequest) -> Result<(), DbError> {
		sqlx::query(&format!(
			"INSERT INTO policy_approval_requests ({REQUEST_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
		))
		.bind(request.id.to_string())
		.bind(request.policy_id.to_string())
		.bind(request.request_type.as_str())
		.bind(request.status.as_str())
		.bind(i64::from(request.required_approvals))
		.bind(i64::from(request.received_approvals))
		.bind(
			request
				.proposed_changes
				.as_ref()
				.map(serde_json::to_string)
				.transpose()?,
		)
		.bind(&request.notes)
		.bind(request.requested_by.to_string())
		.bind(request.resolved_by.map(|r| r.to_string()))
		.bind(opt_ts(request.resolved_at))
		.bind(request.created_at.to_rfc3339())
		.execute(&self.pool)
		.await?;

		tracing::debug!("approval request created");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(request_id = %id))]
	pub async fn get_request(
		&self,
		id: &ApprovalRequestId,
	) -> Result<Option<ApprovalRequest>, DbError> {
		let row = sqlx::query(&format!(
			"SELECT {REQUEST_COLUMNS} FROM policy_approval_requests WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(row_to_request).transpose()
	}

	/// Pending requests, oldest first.
	#[tracing::instrument(skip(self))]
	pub async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, DbError> {
		let rows = sqlx::query(&format!(
			"SELECT {REQUEST_COLUMNS} FROM policy_approval_requests WHERE status = ? ORDER BY created_at ASC, id ASC"
		))
		.bind(ApprovalStatus::Pending.as_str())
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_request).collect()
	}

	#[tracing::instrument(skip(self), fields(request_id = %request_id))]
	pub async fn list_approvals(
		&self,
		request_id: &ApprovalRequestId,
	) -> Result<Vec<PolicyApproval>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT id, request_id, approver_id, decision, comments, created_at
			FROM policy_approvals
			WHERE request_id = ?
			ORDER BY created_at ASC, rowid ASC
			"#,
		)
		.bind(request_id.to_string())
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_approval).collect()
	}

	// =========================================================================
	// Votes
	// =========================================================================

	/// Record one approver's decision and resolve the request if it is final.
	///
	/// # Errors
	/// - `DbError::NotFound` if the request (or, on execution, its policy) is missing
	/// - `DbError::Conflict` with [`REQUEST_ALREADY_RESOLVED`] if the request is not pending
	/// - `DbError::Conflict` with [`APPROVER_ALREADY_VOTED`] if the approver already decided
	///
	/// Any error rolls back the whole vote.
	#[tracing::instrument(skip(self, comments), fields(request_id = %request_id, approver_id = %approver_id, decision = %decision))]
	pub async fn record_vote(
		&self,
		request_id: &ApprovalRequestId,
		approver_id: &UserId,
		decision: ApprovalDecision,
		comments: Option<&str>,
	) -> Result<VoteRecord, DbError> {
		let now = Utc::now();
		let mut tx = self.pool.begin().await?;

		let row = sqlx::query(&format!(
			"SELECT {REQUEST_COLUMNS} FROM policy_approval_requests WHERE id = ?"
		))
		.bind(request_id.to_string())
		.fetch_optional(&mut *tx)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("approval request {request_id}")))?;
		let mut request = row_to_request(&row)?;

		if request.status.is_terminal() {
			return Err(DbError::Conflict(REQUEST_ALREADY_RESOLVED.to_string()));
		}

		let already: i64 = sqlx::query_scalar(
			"SELECT COUNT(*) FROM policy_approvals WHERE request_id = ? AND approver_id = ?",
		)
		.bind(request_id.to_string())
		.bind(approver_id.to_string())
		.fetch_one(&mut *tx)
		.await?;
		if already > 0 {
			return Err(DbError::Conflict(APPROVER_ALREADY_VOTED.to_string()));
		}

		let approval = PolicyApproval {
			id: ApprovalId::generate(),
			request_id: *request_id,
			approver_id: *approver_id,
			decision,
			comments: comments.map(str::to_string),
			created_at: now,
		};
		sqlx::query(
			r#"
			INSERT INTO policy_approvals (id, request_id, approver_id, decision, comments, created_at)
			VALUES (?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(approval.id.to_string())
		.bind(request_id.to_string())
		.bind(approver_id.to_string())
		.bind(decision.as_str())
		.bind(&approval.comments)
		.bind(now.to_rfc3339())
		.execute(&mut *tx)
		.await
		.map_err(|e| conflict_on_unique(e, APPROVER_ALREADY_VOTED))?;

		let outcome = tally(request.required_approvals, request.received_approvals, decision);
		let previous_received = request.received_approvals;
		match outcome {
			VoteOutcome::Pending { received } => {
				request.received_approvals = received;
			}
			VoteOutcome::Approved { received } => {
				request.received_approvals = received;
				request.status = ApprovalStatus::Approved;
				request.resolved_by = Some(*approver_id);
				request.resolved_at = Some(now);
			}
			VoteOutcome::Rejected => {
				request.status = ApprovalStatus::Rejected;
				request.resolved_by = Some(*approver_id);
				request.resolved_at = Some(now);
			}
		}

		let updated = sqlx::query(
			r#"
			UPDATE policy_approval_requests
			SET status = ?, received_approvals = ?, resolved_by = ?, resolved_at = ?
			WHERE id = ? AND status = 'pending' AND received_approvals = ?
			"#,
		)
		.bind(request.status.as_str())
		.bind(i64::from(request.received_approvals))
		.bind(request.resolved_by.map(|r| r.to_string()))
		.bind(opt_ts(request.resolved_at))
		.bind(request_id.to_string())
		.bind(i64::from(previous_received))
		.execute(&mut *tx)
		.await?;
		if updated.rows_affected() != 1 {
			return Err(DbError::Conflict(REQUEST_ALREADY_RESOLVED.to_string()));
		}

		if matches!(outcome, VoteOutcome::Approved { .. }) {
			execute_request(&mut tx, &request, approver_id, now).await?;
		}

		tx.commit().await?;
		tracing::debug!(status = %request.status, received = request.received_approvals, "vote recorded");

		Ok(VoteRecord {
			request,
			approval,
			outcome,
		})
	}
}

#[async_trait]
impl ApprovalStore for ApprovalRepository {
	async fn upsert_workflow(
		&self,
		name: &str,
		request_type: ApprovalRequestType,
		required_approvals: u32,
		priority: i32,
		active: bool,
	) -> Result<ApprovalWorkflow, DbError> {
		self
			.upsert_workflow(name, request_type, required_approvals, priority, active)
			.await
	}

	async fn list_workflows(
		&self,
		request_type: Option<ApprovalRequestType>,
	) -> Result<Vec<ApprovalWorkflow>, DbError> {
		self.list_workflows(request_type).await
	}

	async fn create_request(&self, request: &ApprovalRequest) -> Result<(), DbError> {
		self.create_request(request).await
	}

	async fn get_request(&self, id: &ApprovalRequestId) -> Result<Option<ApprovalRequest>, DbError> {
		self.get_request(id).await
	}

	async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, DbError> {
		self.list_pending().await
	}

	async fn list_approvals(
		&self,
		request_id: &ApprovalRequestId,
	) -> Result<Vec<PolicyApproval>, DbError> {
		self.list_approvals(request_id).await
	}

	async fn record_vote(
		&self,
		request_id: &ApprovalRequestId,
		approver_id: &UserId,
		decision: ApprovalDecision,
		comments: Option<&str>,
	) -> Result<VoteRecord, DbError> {
		self
			.record_vote(request_id, approver_id, decision, comments)
			.await
	}
}
