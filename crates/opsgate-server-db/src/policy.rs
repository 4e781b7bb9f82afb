// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy repository with version snapshots and change log.
//!
//! Every mutation writes the policy row, a new [`PolicyVersion`] holding the
//! resulting state, and a [`PolicyChangeLog`] entry in one transaction. The
//! connection-level helpers are shared with the approval repository so an
//! approved request mutates the policy inside the approval's transaction.

use async_trait::async_trait;
use chrono::Utc;
use opsgate_authz_core::{
	Policy, PolicyChangeLog, PolicyFilter, PolicyId, PolicyStatus, PolicyVersion, UserId,
};
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row, SqliteConnection};
use uuid::Uuid;

use crate::error::{conflict_on_unique, DbError};
use crate::row::{opt_ts, parse_enum, parse_id, parse_json, parse_opt_id, parse_opt_timestamp, parse_timestamp};

const POLICY_COLUMNS: &str = "id, name, description, effect, priority, status, valid_from, valid_until, \
	actions, resource_types, condition, business_vertical_id, created_by, created_at, updated_at";

#[async_trait]
pub trait PolicyStore: Send + Sync {
	async fn create_policy(&self, policy: &Policy) -> Result<(), DbError>;
	async fn get_policy(&self, id: &PolicyId) -> Result<Option<Policy>, DbError>;
	async fn get_policy_by_name(&self, name: &str) -> Result<Option<Policy>, DbError>;
	async fn list_policies(
		&self,
		filter: &PolicyFilter,
		limit: i64,
		offset: i64,
	) -> Result<Vec<Policy>, DbError>;
	async fn list_active_policies(&self) -> Result<Vec<Policy>, DbError>;
	async fn update_policy(
		&self,
		policy: &Policy,
		diff: &Value,
		actor: Option<&UserId>,
		reason: Option<&str>,
	) -> Result<(), DbError>;
	async fn delete_policy(
		&self,
		id: &PolicyId,
		actor: Option<&UserId>,
		reason: Option<&str>,
	) -> Result<bool, DbError>;
	async fn create_version(
		&self,
		policy_id: &PolicyId,
		created_by: Option<&UserId>,
		summary: Option<&str>,
	) -> Result<PolicyVersion, DbError>;
	async fn list_versions(&self, policy_id: &PolicyId) -> Result<Vec<PolicyVersion>, DbError>;
	async fn change_log(&self, policy_id: &PolicyId) -> Result<Vec<PolicyChangeLog>, DbError>;
}

// =============================================================================
// Connection-level helpers
// =============================================================================

pub(crate) fn row_to_policy(row: &sqlx::sqlite::SqliteRow) -> Result<Policy, DbError> {
	let id: String = row.get("id");
	let effect: String = row.get("effect");
	let status: String = row.get("status");
	let actions: String = row.get("actions");
	let resource_types: String = row.get("resource_types");
	let condition: String = row.get("condition");
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");

	Ok(Policy {
		id: parse_id(&id, "policy id")?,
		name: row.get("name"),
		description: row.get("description"),
		effect: parse_enum(&effect)?,
		priority: row.get("priority"),
		status: parse_enum(&status)?,
		valid_from: parse_opt_timestamp(row.get("valid_from"), "valid_from")?,
		valid_until: parse_opt_timestamp(row.get("valid_until"), "valid_until")?,
		actions: parse_json(&actions)?,
		resource_types: parse_json(&resource_types)?,
		condition: parse_json(&condition)?,
		business_vertical_id: parse_opt_id(row.get("business_vertical_id"), "business vertical id")?,
		created_by: parse_opt_id(row.get("created_by"), "created_by")?,
		created_at: parse_timestamp(&created_at, "created_at")?,
		updated_at: parse_timestamp(&updated_at, "updated_at")?,
	})
}

pub(crate) async fn fetch_policy(
	conn: &mut SqliteConnection,
	id: &PolicyId,
) -> Result<Option<Policy>, DbError> {
	let row = sqlx::query(&format!("SELECT {POLICY_COLUMNS} FROM policies WHERE id = ?"))
		.bind(id.to_string())
		.fetch_optional(&mut *conn)
		.await?;
	row.as_ref().map(row_to_policy).transpose()
}

pub(crate) async fn write_policy(conn: &mut SqliteConnection, policy: &Policy) -> Result<(), DbError> {
	let result = sqlx::query(
		r#"
		UPDATE policies SET
			name = ?, description = ?, effect = ?, priority = ?, status = ?,
			valid_from = ?, valid_until = ?, actions = ?, resource_types = ?,
			condition = ?, business_vertical_id = ?, updated_at = ?
		WHERE id = ?
		"#,
	)
	.bind(&policy.name)
	.bind(&policy.description)
	.bind(policy.effect.as_str())
	.bind(policy.priority)
	.bind(policy.status.as_str())
	.bind(opt_ts(policy.valid_from))
	.bind(opt_ts(policy.valid_until))
	.bind(serde_json::to_string(&policy.actions)?)
	.bind(serde_json::to_string(&policy.resource_types)?)
	.bind(serde_json::to_string(&policy.condition)?)
	.bind(policy.business_vertical_id.map(|v| v.to_string()))
	.bind(policy.updated_at.to_rfc3339())
	.bind(policy.id.to_string())
	.execute(&mut *conn)
	.await
	.map_err(|e| conflict_on_unique(e, format!("policy '{}' already exists", policy.name)))?;

	if result.rows_affected() == 0 {
		return Err(DbError::NotFound(format!("policy {}", policy.id)));
	}
	Ok(())
}

pub(crate) async fn remove_policy(conn: &mut SqliteConnection, id: &PolicyId) -> Result<bool, DbError> {
	let result = sqlx::query("DELETE FROM policies WHERE id = ?")
		.bind(id.to_string())
		.execute(&mut *conn)
		.await?;
	Ok(result.rows_affected() > 0)
}

/// Snapshot `policy` as version `1 + max(existing, 0)`.
pub(crate) async fn insert_version(
	conn: &mut SqliteConnection,
	policy: &Policy,
	created_by: Option<&UserId>,
	summary: Option<&str>,
) -> Result<PolicyVersion, DbError> {
	let next: i64 = sqlx::query_scalar(
		"SELECT COALESCE(MAX(version), 0) + 1 FROM policy_versions WHERE policy_id = ?",
	)
	.bind(policy.id.to_string())
	.fetch_one(&mut *conn)
	.await?;

	let version = PolicyVersion {
		id: Uuid::new_v4(),
		policy_id: policy.id,
		version: next,
		snapshot: policy.snapshot(),
		change_summary: summary.map(str::to_string),
		created_by: created_by.copied(),
		created_at: Utc::now(),
	};

	sqlx::query(
		r#"
		INSERT INTO policy_versions (id, policy_id, version, snapshot, change_summary, created_by, created_at)
		VALUES (?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(version.id.to_string())
	.bind(version.policy_id.to_string())
	.bind(version.version)
	.bind(serde_json::to_string(&version.snapshot)?)
	.bind(&version.change_summary)
	.bind(version.created_by.map(|c| c.to_string()))
	.bind(version.created_at.to_rfc3339())
	.execute(&mut *conn)
	.await
	.map_err(|e| conflict_on_unique(e, "concurrent policy version"))?;

	Ok(version)
}

pub(crate) async fn insert_change_log(
	conn: &mut SqliteConnection,
	policy_id: &PolicyId,
	action: &str,
	actor: Option<&UserId>,
	diff: &Value,
	reason: Option<&str>,
) -> Result<(), DbError> {
	sqlx::query(
		r#"
		INSERT INTO policy_change_log (id, policy_id, action, actor, diff, reason, created_at)
		VALUES (?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(Uuid::new_v4().to_string())
	.bind(policy_id.to_string())
	.bind(action)
	.bind(actor.map(|a| a.to_string()))
	.bind(serde_json::to_string(diff)?)
	.bind(reason)
	.bind(Utc::now().to_rfc3339())
	.execute(&mut *conn)
	.await?;
	Ok(())
}

/// Repository for policies.
#[derive(Clone)]
pub struct PolicyRepository {
	pool: SqlitePool,
}

impl PolicyRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert a new policy with version 1 and a `create` change log entry.
	///
	/// # Errors
	/// Returns `DbError::Conflict` if the name is taken.
	#[tracing::instrument(skip(self, policy), fields(policy_id = %policy.id, name = %policy.name))]
	pub async fn create_policy(&self, policy: &Policy) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;

		sqlx::query(&format!(
			"INSERT INTO policies ({POLICY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
		))
		.bind(policy.id.to_string())
		.bind(&policy.name)
		.bind(&policy.description)
		.bind(policy.effect.as_str())
		.bind(policy.priority)
		.bind(policy.status.as_str())
		.bind(opt_ts(policy.valid_from))
		.bind(opt_ts(policy.valid_until))
		.bind(serde_json::to_string(&policy.actions)?)
		.bind(serde_json::to_string(&policy.resource_types)?)
		.bind(serde_json::to_string(&policy.condition)?)
		.bind(policy.business_vertical_id.map(|v| v.to_string()))
		.bind(policy.created_by.map(|c| c.to_string()))
		.bind(policy.created_at.to_rfc3339())
		.bind(policy.updated_at.to_rfc3339())
		.execute(&mut *tx)
		.await
		.map_err(|e| conflict_on_unique(e, format!("policy '{}' already exists", policy.name)))?;

		insert_version(&mut tx, policy, policy.created_by.as_ref(), Some("created")).await?;
		insert_change_log(
			&mut tx,
			&policy.id,
			"create",
			policy.created_by.as_ref(),
			&policy.snapshot(),
			None,
		)
		.await?;

		tx.commit().await?;
		tracing::debug!("policy created");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(policy_id = %id))]
	pub async fn get_policy(&self, id: &PolicyId) -> Result<Option<Policy>, DbError> {
		let mut conn = self.pool.acquire().await?;
		fetch_policy(&mut conn, id).await
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_policy_by_name(&self, name: &str) -> Result<Option<Policy>, DbError> {
		let row = sqlx::query(&format!("SELECT {POLICY_COLUMNS} FROM policies WHERE name = ?"))
			.bind(name)
			.fetch_optional(&self.pool)
			.await?;
		row.as_ref().map(row_to_policy).transpose()
	}

	/// Filtered listing in evaluation order.
	#[tracing::instrument(skip(self, filter))]
	pub async fn list_policies(
		&self,
		filter: &PolicyFilter,
		limit: i64,
		offset: i64,
	) -> Result<Vec<Policy>, DbError> {
		let status = filter.status.map(|s| s.as_str());
		let effect = filter.effect.map(|e| e.as_str());
		let vertical = filter.business_vertical_id.map(|v| v.to_string());
		let name = filter
			.name_contains
			.as_ref()
			.map(|n| format!("%{}%", n.to_lowercase()));

		let rows = sqlx::query(&format!(
			r#"
			SELECT {POLICY_COLUMNS}
			FROM policies
			WHERE (?1 IS NULL OR status = ?1)
				AND (?2 IS NULL OR effect = ?2)
				AND (?3 IS NULL OR business_vertical_id = ?3)
				AND (?4 IS NULL OR LOWER(name) LIKE ?4)
			ORDER BY priority DESC, created_at ASC, id ASC
			LIMIT ?5 OFFSET ?6
			"#
		))
		.bind(status)
		.bind(effect)
		.bind(vertical)
		.bind(name)
		.bind(limit)
		.bind(offset)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_policy).collect()
	}

	/// Every policy with status `active`, in evaluation order.
	///
	/// Validity windows and vertical scope are applied by the caller.
	#[tracing::instrument(skip(self))]
	pub async fn list_active_policies(&self) -> Result<Vec<Policy>, DbError> {
		let rows = sqlx::query(&format!(
			"SELECT {POLICY_COLUMNS} FROM policies WHERE status = ? ORDER BY priority DESC, created_at ASC, id ASC"
		))
		.bind(PolicyStatus::Active.as_str())
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_policy).collect()
	}

	/// Persist `policy`, snapshot it and log `diff`.
	#[tracing::instrument(skip(self, policy, diff, reason), fields(policy_id = %policy.id))]
	pub async fn update_policy(
		&self,
		policy: &Policy,
		diff: &Value,
		actor: Option<&UserId>,
		reason: Option<&str>,
	) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;
		write_policy(&mut tx, policy).await?;
		insert_version(&mut tx, policy, actor, reason).await?;
		insert_change_log(&mut tx, &policy.id, "update", actor, diff, reason).await?;
		tx.commit().await?;

		tracing::debug!("policy updated");
		Ok(())
	}

	/// Returns false if the policy did not exist. History rows are kept.
	#[tracing::instrument(skip(self, reason), fields(policy_id = %id))]
	pub async fn delete_policy(
		&self,
		id: &PolicyId,
		actor: Option<&UserId>,
		reason: Option<&str>,
	) -> Result<bool, DbError> {
		let mut tx = self.pool.begin().await?;
		let Some(existing) = fetch_policy(&mut tx, id).await? else {
			return Ok(false);
		};
		remove_policy(&mut tx, id).await?;
		insert_change_log(&mut tx, id, "delete", actor, &existing.snapshot(), reason).await?;
		tx.commit().await?;

		tracing::debug!("policy deleted");
		Ok(true)
	}

	/// Snapshot the current state of a policy.
	///
	/// # Errors
	/// Returns `DbError::NotFound` if the policy does not exist.
	#[tracing::instrument(skip(self, summary), fields(policy_id = %policy_id))]
	pub async fn create_version(
		&self,
		policy_id: &PolicyId,
		created_by: Option<&UserId>,
		summary: Option<&str>,
	) -> Result<PolicyVersion, DbError> {
		let mut tx = self.pool.begin().await?;
		let policy = fetch_policy(&mut tx, policy_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("policy {policy_id}")))?;
		let version = insert_version(&mut tx, &policy, created_by, summary).await?;
		tx.commit().await?;

		tracing::debug!(version = version.version, "policy version created");
		Ok(version)
	}

	#[tracing::instrument(skip(self), fields(policy_id = %policy_id))]
	pub async fn list_versions(&self, policy_id: &PolicyId) -> Result<Vec<PolicyVersion>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT id, policy_id, version, snapshot, change_summary, created_by, created_at
			FROM policy_versions
			WHERE policy_id = ?
			ORDER BY version ASC
			"#,
		)
		.bind(policy_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows
			.iter()
			.map(|row| {
				let id: String = row.get("id");
				let policy_id: String = row.get("policy_id");
				let snapshot: String = row.get("snapshot");
				let created_at: String = row.get("created_at");
				Ok(PolicyVersion {
					id: parse_id(&id, "version id")?,
					policy_id: parse_id(&policy_id, "policy id")?,
					version: row.get("version"),
					snapshot: parse_json(&snapshot)?,
					change_summary: row.get("change_summary"),
					created_by: parse_opt_id(row.get("created_by"), "created_by")?,
					created_at: parse_timestamp(&created_at, "created_at")?,
				})
			})
			.collect()
	}

	#[tracing::instrument(skip(self), fields(policy_id = %policy_id))]
	pub async fn change_log(&self, policy_id: &PolicyId) -> Result<Vec<PolicyChangeLog>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT id, policy_id, action, actor, diff, reason, created_at
			FROM policy_change_log
			WHERE policy_id = ?
			ORDER BY created_at ASC, rowid ASC
			"#,
		)
		.bind(policy_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows
			.iter()
			.map(|row| {
				let id: String = row.get("id");
				let policy_id: String = row.get("policy_id");
				let diff: String = row.get("diff");
				let created_at: String = row.get("created_at");
				Ok(PolicyChangeLog {
					id: parse_id(&id, "change log id")?,
					policy_id: parse_id(&policy_id, "policy id")?,
					action: row.get("action"),
					actor: parse_opt_id(row.get("actor"), "actor")?,
					diff: parse_json(&diff)?,
					reason: row.get("reason"),
					created_at: parse_timestamp(&created_at, "created_at")?,
				})
			})
			.collect()
	}
}

#[async_trait]
impl PolicyStore for PolicyRepository {
	async fn create_policy(&self, policy: &Policy) -> Result<(), DbError> {
		self.create_policy(policy).await
	}

	async fn get_policy(&self, id: &PolicyId) -> Result<Option<Policy>, DbError> {
		self.get_policy(id).await
	}

	async fn get_policy_by_name(&self, name: &str) -> Result<Option<Policy>, DbError> {
		self.get_policy_by_name(name).await
	}

	async fn list_policies(
		&self,
		filter: &PolicyFilter,
		limit: i64,
		offset: i64,
	) -> Result<Vec<Policy>, DbError> {
		self.list_policies(filter, limit, offset).await
	}

	async fn list_active_policies(&self) -> Result<Vec<Policy>, DbError> {
		self.list_active_policies().await
	}

	async fn update_policy(
		&self,
		policy: &Policy,
		diff: &Value,
		actor: Option<&UserId>,
		reason: Option<&str>,
	) -> Result<(), DbError> {
		self.update_policy(policy, diff, actor, reason).await
	}

	async fn delete_policy(
		&self,
		id: &PolicyId,
		actor: Option<&UserId>,
		reason: Option<&str>,
	) -> Result<bool, DbError> {
		self.delete_policy(id, actor, reason).await
	}

	async fn create_version(
		&self,
		policy_id: &PolicyId,
		created_by: Option<&UserId>,
		summary: Option<&str>,
	) -> Result<PolicyVersion, DbError> {
		self.create_version(policy_id, created_by, summary).await
	}

	async fn list_versions(&self, policy_id: &PolicyId) -> Result<Vec<PolicyVersion>, DbError> {
		self.list_versions(policy_id).await
	}

	async fn change_log(&self, policy_id: &PolicyId) -> Result<Vec<PolicyChangeLog>, DbError> {
		self.change_log(policy_id).await
	}
}
