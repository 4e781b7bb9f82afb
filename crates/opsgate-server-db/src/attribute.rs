// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Attribute repository.
//!
//! User and resource assignments live in separate tables with the same shape.
//! Each table carries a partial unique index over the subject and attribute
//! `WHERE active = 1`, so two racing reassignments cannot both leave an active
//! row behind: the loser fails with [`DbError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opsgate_authz_core::{
	AssignmentId, Attribute, AttributeAssignment, AttributeDataType, AttributeId, AttributeScope,
	AttributeSubject, UserId,
};
use sqlx::{
	query::Query,
	sqlite::{SqliteArguments, SqlitePool},
	Row, Sqlite,
};

use crate::error::{conflict_on_unique, DbError};
use crate::row::{opt_ts, parse_enum, parse_id, parse_opt_id, parse_opt_timestamp, parse_timestamp};

#[async_trait]
pub trait AttributeStore: Send + Sync {
	async fn create_attribute(
		&self,
		name: &str,
		scope: AttributeScope,
		data_type: AttributeDataType,
		description: Option<&str>,
	) -> Result<Attribute, DbError>;
	async fn get_attribute_by_name(&self, name: &str) -> Result<Option<Attribute>, DbError>;
	async fn list_attributes(&self, scope: Option<AttributeScope>) -> Result<Vec<Attribute>, DbError>;
	async fn deactivate_attribute(&self, name: &str) -> Result<bool, DbError>;
	async fn assign(
		&self,
		subject: &AttributeSubject,
		attribute: &Attribute,
		value: &str,
		valid_until: Option<DateTime<Utc>>,
		assigned_by: Option<&UserId>,
	) -> Result<AttributeAssignment, DbError>;
	async fn deactivate_assignment(
		&self,
		subject: &AttributeSubject,
		attribute_id: &AttributeId,
	) -> Result<bool, DbError>;
	async fn list_active_assignments(
		&self,
		subject: &AttributeSubject,
	) -> Result<Vec<AttributeAssignment>, DbError>;
	async fn history(
		&self,
		subject: &AttributeSubject,
		attribute_id: &AttributeId,
	) -> Result<Vec<AttributeAssignment>, DbError>;
	async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, DbError>;
}

/// Table name and subject predicates for one subject kind.
struct SubjectTable {
	table: &'static str,
	predicate: &'static str,
	qualified_predicate: &'static str,
}

fn subject_table(subject: &AttributeSubject) -> SubjectTable {
	match subject {
		AttributeSubject::User(_) => SubjectTable {
			table: "user_attributes",
			predicate: "user_id = ?",
			qualified_predicate: "t.user_id = ?",
		},
		AttributeSubject::Resource { .. } => SubjectTable {
			table: "resource_attributes",
			predicate: "resource_type = ? AND resource_id = ?",
			qualified_predicate: "t.resource_type = ? AND t.resource_id = ?",
		},
	}
}

fn bind_subject<'q>(
	query: Query<'q, Sqlite, SqliteArguments<'q>>,
	subject: &AttributeSubject,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
	match subject {
		AttributeSubject::User(id) => query.bind(id.to_string()),
		AttributeSubject::Resource {
			resource_type,
			resource_id,
		} => query.bind(resource_type.clone()).bind(resource_id.clone()),
	}
}

/// Repository for attribute definitions and assignments.
#[derive(Clone)]
pub struct AttributeRepository {
	pool: SqlitePool,
}

impl AttributeRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	// =========================================================================
	// Definitions
	// =========================================================================

	/// # Errors
	/// Returns `DbError::Conflict` if the name is taken.
	#[tracing::instrument(skip(self, description), fields(attribute = %name, scope = %scope))]
	pub async fn create_attribute(
		&self,
		name: &str,
		scope: AttributeScope,
		data_type: AttributeDataType,
		description: Option<&str>,
	) -> Result<Attribute, DbError> {
		let attribute = Attribute {
			id: AttributeId::generate(),
			name: name.to_string(),
			scope,
			data_type,
			description: description.map(str::to_string),
			active: true,
			created_at: Utc::now(),
		};

		sqlx::query(
			r#"
			INSERT INTO attributes (id, name, scope, data_type, description, active, created_at)
			VALUES (?, ?, ?, ?, ?, 1, ?)
			"#,
		)
		.bind(attribute.id.to_string())
		.bind(&attribute.name)
		.bind(scope.as_str())
		.bind(data_type.as_str())
		.bind(&attribute.description)
		.bind(attribute.created_at.to_rfc3339())
		.execute(&self.pool)
		.await
		.map_err(|e| conflict_on_unique(e, format!("attribute '{name}' already exists")))?;

		tracing::debug!(attribute_id = %attribute.id, "attribute defined");
		Ok(attribute)
	}

	fn row_to_attribute(row: &sqlx::sqlite::SqliteRow) -> Result<Attribute, DbError> {
		let id: String = row.get("id");
		let scope: String = row.get("scope");
		let data_type: String = row.get("data_type");
		let active: i32 = row.get("active");
		let created_at: String = row.get("created_at");
		Ok(Attribute {
			id: parse_id(&id, "attribute id")?,
			name: row.get("name"),
			scope: parse_enum(&scope)?,
			data_type: parse_enum(&data_type)?,
			description: row.get("description"),
			active: active != 0,
			created_at: parse_timestamp(&created_at, "created_at")?,
		})
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_attribute_by_name(&self, name: &str) -> Result<Option<Attribute>, DbError> {
		let row = sqlx::query(
			"SELECT id, name, scope, data_type, description, active, created_at FROM attributes WHERE name = ?",
		)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(Self::row_to_attribute).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_attributes(
		&self,
		scope: Option<AttributeScope>,
	) -> Result<Vec<Attribute>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT id, name, scope, data_type, description, active, created_at
			FROM attributes
			WHERE (? IS NULL OR scope = ?)
			ORDER BY name
			"#,
		)
		.bind(scope.map(|s| s.as_str()))
		.bind(scope.map(|s| s.as_str()))
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(Self::row_to_attribute).collect()
	}

	/// Returns false if the attribute was unknown or already inactive.
	#[tracing::instrument(skip(self))]
	pub async fn deactivate_attribute(&self, name: &str) -> Result<bool, DbError> {
		let result = sqlx::query("UPDATE attributes SET active = 0 WHERE name = ? AND active = 1")
			.bind(name)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	// =========================================================================
	// Assignments
	// =========================================================================

	/// Replace the active value for `(subject, attribute)` in one transaction.
	///
	/// # Errors
	/// Returns `DbError::Conflict` if a concurrent assignment won the race.
	#[tracing::instrument(skip(self, attribute, value), fields(subject = %subject, attribute = %attribute.name))]
	pub async fn assign(
		&self,
		subject: &AttributeSubject,
		attribute: &Attribute,
		value: &str,
		valid_until: Option<DateTime<Utc>>,
		assigned_by: Option<&UserId>,
	) -> Result<AttributeAssignment, DbError> {
		let now = Utc::now();
		let assignment = AttributeAssignment {
			id: AssignmentId::generate(),
			subject: subject.clone(),
			attribute_id: attribute.id,
			attribute_name: attribute.name.clone(),
			data_type: attribute.data_type,
			value: value.to_string(),
			valid_from: now,
			valid_until,
			active: true,
			assigned_by: assigned_by.copied(),
			created_at: now,
		};

		let table = subject_table(subject);
		let mut tx = self.pool.begin().await?;

		let deactivate = format!(
			"UPDATE {} SET active = 0 WHERE {} AND attribute_id = ? AND active = 1",
			table.table, table.predicate
		);
		let replaced = bind_subject(sqlx::query(&deactivate), subject)
			.bind(attribute.id.to_string())
			.execute(&mut *tx)
			.await?
			.rows_affected();

		let insert = match subject {
			AttributeSubject::User(_) => {
				"INSERT INTO user_attributes (user_id, id, attribute_id, value, valid_from, valid_until, active, assigned_by, created_at) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)"
			}
			AttributeSubject::Resource { .. } => {
				"INSERT INTO resource_attributes (resource_type, resource_id, id, attribute_id, value, valid_from, valid_until, active, assigned_by, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)"
			}
		};
		bind_subject(sqlx::query(insert), subject)
			.bind(assignment.id.to_string())
			.bind(attribute.id.to_string())
			.bind(&assignment.value)
			.bind(now.to_rfc3339())
			.bind(opt_ts(valid_until))
			.bind(assigned_by.map(|a| a.to_string()))
			.bind(now.to_rfc3339())
			.execute(&mut *tx)
			.await
			.map_err(|e| conflict_on_unique(e, "concurrent attribute assignment"))?;

		tx.commit().await?;

		tracing::debug!(assignment_id = %assignment.id, replaced, "attribute assigned");
		Ok(assignment)
	}

	/// Returns false if no active row existed.
	#[tracing::instrument(skip(self), fields(subject = %subject, attribute_id = %attribute_id))]
	pub async fn deactivate_assignment(
		&self,
		subject: &AttributeSubject,
		attribute_id: &AttributeId,
	) -> Result<bool, DbError> {
		let table = subject_table(subject);
		let sql = format!(
			"UPDATE {} SET active = 0 WHERE {} AND attribute_id = ? AND active = 1",
			table.table, table.predicate
		);
		let result = bind_subject(sqlx::query(&sql), subject)
			.bind(attribute_id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	fn select_sql(subject: &AttributeSubject, extra: &str) -> String {
		let table = subject_table(subject);
		format!(
			r#"
			SELECT t.id, t.attribute_id, a.name AS attribute_name, a.data_type,
				t.value, t.valid_from, t.valid_until, t.active, t.assigned_by, t.created_at
			FROM {table} t
			JOIN attributes a ON a.id = t.attribute_id
			WHERE {predicate} {extra}
			"#,
			table = table.table,
			predicate = table.qualified_predicate,
		)
	}

	fn row_to_assignment(
		subject: &AttributeSubject,
		row: &sqlx::sqlite::SqliteRow,
	) -> Result<AttributeAssignment, DbError> {
		let id: String = row.get("id");
		let attribute_id: String = row.get("attribute_id");
		let data_type: String = row.get("data_type");
		let valid_from: String = row.get("valid_from");
		let active: i32 = row.get("active");
		let created_at: String = row.get("created_at");
		Ok(AttributeAssignment {
			id: parse_id(&id, "assignment id")?,
			subject: subject.clone(),
			attribute_id: parse_id(&attribute_id, "attribute id")?,
			attribute_name: row.get("attribute_name"),
			data_type: parse_enum(&data_type)?,
			value: row.get("value"),
			valid_from: parse_timestamp(&valid_from, "valid_from")?,
			valid_until: parse_opt_timestamp(row.get("valid_until"), "valid_until")?,
			active: active != 0,
			assigned_by: parse_opt_id(row.get("assigned_by"), "assigned_by")?,
			created_at: parse_timestamp(&created_at, "created_at")?,
		})
	}

	/// Rows flagged active whose attribute definition is also active.
	///
	/// Validity windows are not applied here; callers filter with
	/// [`AttributeAssignment::is_effective_at`].
	#[tracing::instrument(skip(self), fields(subject = %subject))]
	pub async fn list_active_assignments(
		&self,
		subject: &AttributeSubject,
	) -> Result<Vec<AttributeAssignment>, DbError> {
		let sql = Self::select_sql(subject, "AND t.active = 1 AND a.active = 1 ORDER BY a.name");
		let rows = bind_subject(sqlx::query(&sql), subject)
			.fetch_all(&self.pool)
			.await?;
		rows
			.iter()
			.map(|row| Self::row_to_assignment(subject, row))
			.collect()
	}

	/// Every row for `(subject, attribute)`, newest first.
	#[tracing::instrument(skip(self), fields(subject = %subject, attribute_id = %attribute_id))]
	pub async fn history(
		&self,
		subject: &AttributeSubject,
		attribute_id: &AttributeId,
	) -> Result<Vec<AttributeAssignment>, DbError> {
		let sql = Self::select_sql(subject, "AND t.attribute_id = ? ORDER BY t.created_at DESC, t.rowid DESC");
		let rows = bind_subject(sqlx::query(&sql), subject)
			.bind(attribute_id.to_string())
			.fetch_all(&self.pool)
			.await?;
		rows
			.iter()
			.map(|row| Self::row_to_assignment(subject, row))
			.collect()
	}

	/// Flip `active = 0` on rows whose validity has ended. Returns the count.
	#[tracing::instrument(skip(self))]
	pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
		let mut expired = 0;
		for table in ["user_attributes", "resource_attributes"] {
			let rows = sqlx::query(&format!(
				"SELECT id, valid_until FROM {table} WHERE active = 1 AND valid_until IS NOT NULL"
			))
			.fetch_all(&self.pool)
			.await?;

			for row in rows {
				let id: String = row.get("id");
				let valid_until: String = row.get("valid_until");
				if parse_timestamp(&valid_until, "valid_until")? <= now {
					expired += sqlx::query(&format!("UPDATE {table} SET active = 0 WHERE id = ?"))
						.bind(id)
						.execute(&self.pool)
						.await?
						.rows_affected();
				}
			}
		}

		if expired > 0 {
			tracing::debug!(expired, "expired attribute assignments deactivated");
		}
		Ok(expired)
	}
}

#[async_trait]
impl AttributeStore for AttributeRepository {
	async fn create_attribute(
		&self,
		name: &str,
		scope: AttributeScope,
		data_type: AttributeDataType,
		description: Option<&str>,
	) -> Result<Attribute, DbError> {
		self
			.create_attribute(name, scope, data_type, description)
			.await
	}

	async fn get_attribute_by_name(&self, name: &str) -> Result<Option<Attribute>, DbError> {
		self.get_attribute_by_name(name).await
	}

	async fn list_attributes(&self, scope: Option<AttributeScope>) -> Result<Vec<Attribute>, DbError> {
		self.list_attributes(scope).await
	}

	async fn deactivate_attribute(&self, name: &str) -> Result<bool, DbError> {
		self.deactivate_attribute(name).await
	}

	async fn assign(
		&self,
		subject: &AttributeSubject,
		attribute: &Attribute,
		value: &str,
		valid_until: Option<DateTime<Utc>>,
		assigned_by: Option<&UserId>,
	) -> Result<AttributeAssignment, DbError> {
		self
			.assign(subject, attribute, value, valid_until, assigned_by)
			.await
	}

	async fn deactivate_assignment(
		&self,
		subject: &AttributeSubject,
		attribute_id: &AttributeId,
	) -> Result<bool, DbError> {
		self.deactivate_assignment(subject, attribute_id).await
	}

	async fn list_active_assignments(
		&self,
		subject: &AttributeSubject,
	) -> Result<Vec<AttributeAssignment>, DbError> {
		self.list_active_assignments(subject).await
	}

	async fn history(
		&self,
		subject: &AttributeSubject,
		attribute_id: &AttributeId,
	) -> Result<Vec<AttributeAssignment>, DbError> {
		self.history(subject, attribute_id).await
	}

	async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
		self.expire_stale(now).await
	}
}
