// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! RBAC repository: roles, permissions, users, business verticals, business
//! roles, memberships, sites and per-site grants.

use async_trait::async_trait;
use chrono::Utc;
use opsgate_authz_core::{
	BusinessRole, BusinessRoleId, BusinessVertical, BusinessVerticalId, Role, RoleId, Site,
	SiteAccess, SiteFlags, SiteId, User, UserBusinessRole, UserId,
};
use sqlx::{sqlite::SqlitePool, Row, Sqlite, Transaction};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::{conflict_on_unique, DbError};
use crate::row::{parse_id, parse_opt_id, parse_timestamp};

#[async_trait]
pub trait RbacStore: Send + Sync {
	async fn create_role(
		&self,
		name: &str,
		level: i32,
		permissions: &[&str],
	) -> Result<Role, DbError>;
	async fn get_role(&self, id: &RoleId) -> Result<Option<Role>, DbError>;
	async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, DbError>;
	async fn create_user(
		&self,
		display_name: &str,
		role_id: Option<&RoleId>,
	) -> Result<User, DbError>;
	async fn get_user(&self, id: &UserId) -> Result<Option<User>, DbError>;
	async fn set_user_role(&self, user_id: &UserId, role_id: Option<&RoleId>)
		-> Result<(), DbError>;
	async fn create_vertical(
		&self,
		code: &str,
		name: &str,
		description: Option<&str>,
	) -> Result<BusinessVertical, DbError>;
	async fn get_vertical(
		&self,
		id: &BusinessVerticalId,
	) -> Result<Option<BusinessVertical>, DbError>;
	async fn find_vertical_by_code(&self, code: &str) -> Result<Option<BusinessVertical>, DbError>;
	async fn find_vertical_by_name(&self, name: &str) -> Result<Option<BusinessVertical>, DbError>;
	async fn create_business_role(
		&self,
		vertical_id: &BusinessVerticalId,
		name: &str,
		level: i32,
		permissions: &[&str],
	) -> Result<BusinessRole, DbError>;
	async fn get_business_role(&self, id: &BusinessRoleId)
		-> Result<Option<BusinessRole>, DbError>;
	async fn list_active_business_roles(
		&self,
		user_id: &UserId,
	) -> Result<Vec<UserBusinessRole>, DbError>;
	async fn assign_business_role(
		&self,
		user_id: &UserId,
		business_role_id: &BusinessRoleId,
		assigned_by: Option<&UserId>,
	) -> Result<UserBusinessRole, DbError>;
	async fn deactivate_business_role(
		&self,
		user_id: &UserId,
		business_role_id: &BusinessRoleId,
	) -> Result<bool, DbError>;
	async fn create_site(&self, vertical_id: &BusinessVerticalId, name: &str)
		-> Result<Site, DbError>;
	async fn get_site(&self, id: &SiteId) -> Result<Option<Site>, DbError>;
	async fn list_sites(&self, vertical_id: &BusinessVerticalId) -> Result<Vec<Site>, DbError>;
	async fn get_site_access(
		&self,
		user_id: &UserId,
		site_id: &SiteId,
	) -> Result<Option<SiteFlags>, DbError>;
	async fn list_site_access(
		&self,
		user_id: &UserId,
		vertical_id: &BusinessVerticalId,
	) -> Result<Vec<SiteAccess>, DbError>;
	async fn upsert_site_access(
		&self,
		user_id: &UserId,
		site_id: &SiteId,
		flags: SiteFlags,
		granted_by: Option<&UserId>,
	) -> Result<(), DbError>;
}

/// Repository for RBAC state.
///
/// Permissions are normalized into their own table and linked to global and
/// business roles through join tables.
#[derive(Clone)]
pub struct RbacRepository {
	pool: SqlitePool,
}

impl RbacRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	// =========================================================================
	// Roles & permissions
	// =========================================================================

	async fn ensure_permission(
		tx: &mut Transaction<'_, Sqlite>,
		name: &str,
	) -> Result<String, DbError> {
		sqlx::query(
			r#"
			INSERT OR IGNORE INTO permissions (id, name, description, created_at)
			VALUES (?, ?, NULL, ?)
			"#,
		)
		.bind(Uuid::new_v4().to_string())
		.bind(name)
		.bind(Utc::now().to_rfc3339())
		.execute(&mut **tx)
		.await?;

		let row = sqlx::query("SELECT id FROM permissions WHERE name = ?")
			.bind(name)
			.fetch_one(&mut **tx)
			.await?;
		Ok(row.get("id"))
	}

	/// Create a global role, creating any permission names it references.
	///
	/// # Errors
	/// Returns `DbError::Conflict` if a role with this name exists.
	#[tracing::instrument(skip(self, permissions), fields(role = %name, level))]
	pub async fn create_role(
		&self,
		name: &str,
		level: i32,
		permissions: &[&str],
	) -> Result<Role, DbError> {
		let id = RoleId::generate();
		let mut tx = self.pool.begin().await?;

		sqlx::query("INSERT INTO roles (id, name, level, created_at) VALUES (?, ?, ?, ?)")
			.bind(id.to_string())
			.bind(name)
			.bind(level)
			.bind(Utc::now().to_rfc3339())
			.execute(&mut *tx)
			.await
			.map_err(|e| conflict_on_unique(e, format!("role '{name}' already exists")))?;

		for permission in permissions {
			let permission_id = Self::ensure_permission(&mut tx, permission).await?;
			sqlx::query("INSERT OR IGNORE INTO role_permissions (role_id, permission_id) VALUES (?, ?)")
				.bind(id.to_string())
				.bind(permission_id)
				.execute(&mut *tx)
				.await?;
		}

		tx.commit().await?;
		tracing::debug!(role_id = %id, "role created");

		Ok(Role {
			id,
			name: name.to_string(),
			level,
			permissions: permissions.iter().map(|p| p.to_string()).collect(),
		})
	}

	async fn role_permissions(&self, role_id: &str) -> Result<BTreeSet<String>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT p.name
			FROM role_permissions rp
			JOIN permissions p ON p.id = rp.permission_id
			WHERE rp.role_id = ?
			"#,
		)
		.bind(role_id)
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
	}

	async fn row_to_role(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Role, DbError> {
		let id: String = row.get("id");
		let permissions = self.role_permissions(&id).await?;
		Ok(Role {
			id: parse_id(&id, "role id")?,
			name: row.get("name"),
			level: row.get("level"),
			permissions,
		})
	}

	#[tracing::instrument(skip(self), fields(role_id = %id))]
	pub async fn get_role(&self, id: &RoleId) -> Result<Option<Role>, DbError> {
		let row = sqlx::query("SELECT id, name, level FROM roles WHERE id = ?")
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;
		match row {
			Some(row) => Ok(Some(self.row_to_role(&row).await?)),
			None => Ok(None),
		}
	}

	/// Role names are case-sensitive.
	#[tracing::instrument(skip(self))]
	pub async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, DbError> {
		let row = sqlx::query("SELECT id, name, level FROM roles WHERE name = ?")
			.bind(name)
			.fetch_optional(&self.pool)
			.await?;
		match row {
			Some(row) => Ok(Some(self.row_to_role(&row).await?)),
			None => Ok(None),
		}
	}

	// =========================================================================
	// Users
	// =========================================================================

	#[tracing::instrument(skip(self))]
	pub async fn create_user(
		&self,
		display_name: &str,
		role_id: Option<&RoleId>,
	) -> Result<User, DbError> {
		let user = User {
			id: UserId::generate(),
			display_name: display_name.to_string(),
			role_id: role_id.copied(),
			created_at: Utc::now(),
		};

		sqlx::query("INSERT INTO users (id, display_name, role_id, created_at) VALUES (?, ?, ?, ?)")
			.bind(user.id.to_string())
			.bind(&user.display_name)
			.bind(user.role_id.map(|r| r.to_string()))
			.bind(user.created_at.to_rfc3339())
			.execute(&self.pool)
			.await?;

		tracing::debug!(user_id = %user.id, "user created");
		Ok(user)
	}

	#[tracing::instrument(skip(self), fields(user_id = %id))]
	pub async fn get_user(&self, id: &UserId) -> Result<Option<User>, DbError> {
		let row = sqlx::query("SELECT id, display_name, role_id, created_at FROM users WHERE id = ?")
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;

		row
			.map(|r| {
				let id: String = r.get("id");
				let created_at: String = r.get("created_at");
				Ok(User {
					id: parse_id(&id, "user id")?,
					display_name: r.get("display_name"),
					role_id: parse_opt_id(r.get("role_id"), "role id")?,
					created_at: parse_timestamp(&created_at, "created_at")?,
				})
			})
			.transpose()
	}

	/// # Errors
	/// Returns `DbError::NotFound` if the user does not exist.
	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn set_user_role(
		&self,
		user_id: &UserId,
		role_id: Option<&RoleId>,
	) -> Result<(), DbError> {
		let result = sqlx::query("UPDATE users SET role_id = ? WHERE id = ?")
			.bind(role_id.map(|r| r.to_string()))
			.bind(user_id.to_string())
			.execute(&self.pool)
			.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("user {user_id}")));
		}
		tracing::debug!(user_id = %user_id, role_id = ?role_id, "global role updated");
		Ok(())
	}

	// =========================================================================
	// Business verticals
	// =========================================================================

	#[tracing::instrument(skip(self, description))]
	pub async fn create_vertical(
		&self,
		code: &str,
		name: &str,
		description: Option<&str>,
	) -> Result<BusinessVertical, DbError> {
		let vertical = BusinessVertical {
			id: BusinessVerticalId::generate(),
			code: code.to_string(),
			name: name.to_string(),
			description: description.map(str::to_string),
			created_at: Utc::now(),
		};

		sqlx::query(
			r#"
			INSERT INTO business_verticals (id, code, name, description, created_at)
			VALUES (?, ?, ?, ?, ?)
			"#,
		)
		.bind(vertical.id.to_string())
		.bind(&vertical.code)
		.bind(&vertical.name)
		.bind(&vertical.description)
		.bind(vertical.created_at.to_rfc3339())
		.execute(&self.pool)
		.await
		.map_err(|e| conflict_on_unique(e, format!("business vertical '{code}' already exists")))?;

		tracing::debug!(vertical_id = %vertical.id, "business vertical created");
		Ok(vertical)
	}

	fn row_to_vertical(row: &sqlx::sqlite::SqliteRow) -> Result<BusinessVertical, DbError> {
		let id: String = row.get("id");
		let created_at: String = row.get("created_at");
		Ok(BusinessVertical {
			id: parse_id(&id, "business vertical id")?,
			code: row.get("code"),
			name: row.get("name"),
			description: row.get("description"),
			created_at: parse_timestamp(&created_at, "created_at")?,
		})
	}

	#[tracing::instrument(skip(self), fields(vertical_id = %id))]
	pub async fn get_vertical(
		&self,
		id: &BusinessVerticalId,
	) -> Result<Option<BusinessVertical>, DbError> {
		let row = sqlx::query(
			"SELECT id, code, name, description, created_at FROM business_verticals WHERE id = ?",
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(Self::row_to_vertical).transpose()
	}

	/// Case-insensitive lookup by code; the column collates `NOCASE`.
	#[tracing::instrument(skip(self))]
	pub async fn find_vertical_by_code(
		&self,
		code: &str,
	) -> Result<Option<BusinessVertical>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT id, code, name, description, created_at
			FROM business_verticals
			WHERE code = ?
			"#,
		)
		.bind(code)
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(Self::row_to_vertical).transpose()
	}

	/// Case-insensitive lookup by display name; the column collates `NOCASE`.
	#[tracing::instrument(skip(self))]
	pub async fn find_vertical_by_name(
		&self,
		name: &str,
	) -> Result<Option<BusinessVertical>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT id, code, name, description, created_at
			FROM business_verticals
			WHERE name = ?
			"#,
		)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(Self::row_to_vertical).transpose()
	}

	// =========================================================================
	// Business roles & memberships
	// =========================================================================

	#[tracing::instrument(skip(self, permissions), fields(vertical_id = %vertical_id, role = %name))]
	pub async fn create_business_role(
		&self,
		vertical_id: &BusinessVerticalId,
		name: &str,
		level: i32,
		permissions: &[&str],
	) -> Result<BusinessRole, DbError> {
		let id = BusinessRoleId::generate();
		let mut tx = self.pool.begin().await?;

		sqlx::query(
			r#"
			INSERT INTO business_roles (id, business_vertical_id, name, level, created_at)
			VALUES (?, ?, ?, ?, ?)
			"#,
		)
		.bind(id.to_string())
		.bind(vertical_id.to_string())
		.bind(name)
		.bind(level)
		.bind(Utc::now().to_rfc3339())
		.execute(&mut *tx)
		.await
		.map_err(|e| conflict_on_unique(e, format!("business role '{name}' already exists")))?;

		for permission in permissions {
			let permission_id = Self::ensure_permission(&mut tx, permission).await?;
			sqlx::query(
				"INSERT OR IGNORE INTO business_role_permissions (business_role_id, permission_id) VALUES (?, ?)",
			)
			.bind(id.to_string())
			.bind(permission_id)
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;
		tracing::debug!(business_role_id = %id, "business role created");

		Ok(BusinessRole {
			id,
			business_vertical_id: *vertical_id,
			name: name.to_string(),
			level,
			permissions: permissions.iter().map(|p| p.to_string()).collect(),
		})
	}

	async fn business_role_permissions(&self, role_id: &str) -> Result<BTreeSet<String>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT p.name
			FROM business_role_permissions brp
			JOIN permissions p ON p.id = brp.permission_id
			WHERE brp.business_role_id = ?
			"#,
		)
		.bind(role_id)
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
	}

	async fn row_to_business_role(
		&self,
		row: &sqlx::sqlite::SqliteRow,
		id_column: &str,
	) -> Result<BusinessRole, DbError> {
		let id: String = row.get(id_column);
		let vertical_id: String = row.get("business_vertical_id");
		let permissions = self.business_role_permissions(&id).await?;
		Ok(BusinessRole {
			id: parse_id(&id, "business role id")?,
			business_vertical_id: parse_id(&vertical_id, "business vertical id")?,
			name: row.get("role_name"),
			level: row.get("level"),
			permissions,
		})
	}

	#[tracing::instrument(skip(self), fields(business_role_id = %id))]
	pub async fn get_business_role(
		&self,
		id: &BusinessRoleId,
	) -> Result<Option<BusinessRole>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT id, business_vertical_id, name AS role_name, level
			FROM business_roles
			WHERE id = ?
			"#,
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;
		match row {
			Some(row) => Ok(Some(self.row_to_business_role(&row, "id").await?)),
			None => Ok(None),
		}
	}

	/// Active memberships of a user across every vertical.
	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn list_active_business_roles(
		&self,
		user_id: &UserId,
	) -> Result<Vec<UserBusinessRole>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT ubr.id, ubr.user_id, ubr.active, ubr.assigned_by, ubr.created_at,
				br.id AS business_role_id, br.business_vertical_id, br.name AS role_name, br.level
			FROM user_business_roles ubr
			JOIN business_roles br ON br.id = ubr.business_role_id
			WHERE ubr.user_id = ? AND ubr.active = 1
			ORDER BY ubr.created_at, ubr.id
			"#,
		)
		.bind(user_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		let mut memberships = Vec::with_capacity(rows.len());
		for row in &rows {
			let id: String = row.get("id");
			let user_id: String = row.get("user_id");
			let active: i32 = row.get("active");
			let created_at: String = row.get("created_at");
			memberships.push(UserBusinessRole {
				id: parse_id(&id, "membership id")?,
				user_id: parse_id(&user_id, "user id")?,
				business_role: self.row_to_business_role(row, "business_role_id").await?,
				active: active != 0,
				assigned_by: parse_opt_id(row.get("assigned_by"), "assigned_by")?,
				created_at: parse_timestamp(&created_at, "created_at")?,
			});
		}
		Ok(memberships)
	}

	/// # Errors
	/// Returns `DbError::NotFound` if the business role is unknown and
	/// `DbError::Conflict` if the user already holds it.
	#[tracing::instrument(skip(self), fields(user_id = %user_id, business_role_id = %business_role_id))]
	pub async fn assign_business_role(
		&self,
		user_id: &UserId,
		business_role_id: &BusinessRoleId,
		assigned_by: Option<&UserId>,
	) -> Result<UserBusinessRole, DbError> {
		let business_role = self
			.get_business_role(business_role_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("business role {business_role_id}")))?;

		let membership = UserBusinessRole {
			id: Uuid::new_v4(),
			user_id: *user_id,
			business_role,
			active: true,
			assigned_by: assigned_by.copied(),
			created_at: Utc::now(),
		};

		sqlx::query(
			r#"
			INSERT INTO user_business_roles (id, user_id, business_role_id, active, assigned_by, created_at)
			VALUES (?, ?, ?, 1, ?, ?)
			"#,
		)
		.bind(membership.id.to_string())
		.bind(user_id.to_string())
		.bind(business_role_id.to_string())
		.bind(assigned_by.map(|a| a.to_string()))
		.bind(membership.created_at.to_rfc3339())
		.execute(&self.pool)
		.await
		.map_err(|e| conflict_on_unique(e, "business role already assigned"))?;

		tracing::debug!(membership_id = %membership.id, "business role assigned");
		Ok(membership)
	}

	/// Returns false if the user held no active membership in the role.
	#[tracing::instrument(skip(self), fields(user_id = %user_id, business_role_id = %business_role_id))]
	pub async fn deactivate_business_role(
		&self,
		user_id: &UserId,
		business_role_id: &BusinessRoleId,
	) -> Result<bool, DbError> {
		let result = sqlx::query(
			r#"
			UPDATE user_business_roles
			SET active = 0
			WHERE user_id = ? AND business_role_id = ? AND active = 1
			"#,
		)
		.bind(user_id.to_string())
		.bind(business_role_id.to_string())
		.execute(&self.pool)
		.await?;

		let changed = result.rows_affected() > 0;
		if changed {
			tracing::debug!("business role deactivated");
		}
		Ok(changed)
	}

	// =========================================================================
	// Sites
	// =========================================================================

	#[tracing::instrument(skip(self), fields(vertical_id = %vertical_id))]
	pub async fn create_site(
		&self,
		vertical_id: &BusinessVerticalId,
		name: &str,
	) -> Result<Site, DbError> {
		let site = Site {
			id: SiteId::generate(),
			business_vertical_id: *vertical_id,
			name: name.to_string(),
		};

		sqlx::query("INSERT INTO sites (id, business_vertical_id, name, created_at) VALUES (?, ?, ?, ?)")
			.bind(site.id.to_string())
			.bind(vertical_id.to_string())
			.bind(&site.name)
			.bind(Utc::now().to_rfc3339())
			.execute(&self.pool)
			.await
			.map_err(|e| conflict_on_unique(e, format!("site '{name}' already exists")))?;

		tracing::debug!(site_id = %site.id, "site created");
		Ok(site)
	}

	fn row_to_site(row: &sqlx::sqlite::SqliteRow) -> Result<Site, DbError> {
		let id: String = row.get("id");
		let vertical_id: String = row.get("business_vertical_id");
		Ok(Site {
			id: parse_id(&id, "site id")?,
			business_vertical_id: parse_id(&vertical_id, "business vertical id")?,
			name: row.get("name"),
		})
	}

	#[tracing::instrument(skip(self), fields(site_id = %id))]
	pub async fn get_site(&self, id: &SiteId) -> Result<Option<Site>, DbError> {
		let row = sqlx::query("SELECT id, business_vertical_id, name FROM sites WHERE id = ?")
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;
		row.as_ref().map(Self::row_to_site).transpose()
	}

	#[tracing::instrument(skip(self), fields(vertical_id = %vertical_id))]
	pub async fn list_sites(&self, vertical_id: &BusinessVerticalId) -> Result<Vec<Site>, DbError> {
		let rows = sqlx::query(
			"SELECT id, business_vertical_id, name FROM sites WHERE business_vertical_id = ? ORDER BY name, id",
		)
		.bind(vertical_id.to_string())
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(Self::row_to_site).collect()
	}

	fn row_to_flags(row: &sqlx::sqlite::SqliteRow) -> SiteFlags {
		SiteFlags {
			can_read: row.get::<i32, _>("can_read") != 0,
			can_create: row.get::<i32, _>("can_create") != 0,
			can_update: row.get::<i32, _>("can_update") != 0,
			can_delete: row.get::<i32, _>("can_delete") != 0,
		}
	}

	#[tracing::instrument(skip(self), fields(user_id = %user_id, site_id = %site_id))]
	pub async fn get_site_access(
		&self,
		user_id: &UserId,
		site_id: &SiteId,
	) -> Result<Option<SiteFlags>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT can_read, can_create, can_update, can_delete
			FROM user_site_access
			WHERE user_id = ? AND site_id = ?
			"#,
		)
		.bind(user_id.to_string())
		.bind(site_id.to_string())
		.fetch_optional(&self.pool)
		.await?;
		Ok(row.as_ref().map(Self::row_to_flags))
	}

	/// Explicit grants of a user on the sites of one vertical.
	#[tracing::instrument(skip(self), fields(user_id = %user_id, vertical_id = %vertical_id))]
	pub async fn list_site_access(
		&self,
		user_id: &UserId,
		vertical_id: &BusinessVerticalId,
	) -> Result<Vec<SiteAccess>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT usa.site_id, usa.can_read, usa.can_create, usa.can_update, usa.can_delete
			FROM user_site_access usa
			JOIN sites s ON s.id = usa.site_id
			WHERE usa.user_id = ? AND s.business_vertical_id = ?
			ORDER BY s.name, s.id
			"#,
		)
		.bind(user_id.to_string())
		.bind(vertical_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows
			.iter()
			.map(|row| {
				let site_id: String = row.get("site_id");
				Ok(SiteAccess {
					site_id: parse_id(&site_id, "site id")?,
					flags: Self::row_to_flags(row),
				})
			})
			.collect()
	}

	#[tracing::instrument(skip(self, flags), fields(user_id = %user_id, site_id = %site_id))]
	pub async fn upsert_site_access(
		&self,
		user_id: &UserId,
		site_id: &SiteId,
		flags: SiteFlags,
		granted_by: Option<&UserId>,
	) -> Result<(), DbError> {
		sqlx::query(
			r#"
			INSERT INTO user_site_access
				(user_id, site_id, can_read, can_create, can_update, can_delete, granted_by, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT (user_id, site_id) DO UPDATE SET
				can_read = excluded.can_read,
				can_create = excluded.can_create,
				can_update = excluded.can_update,
				can_delete = excluded.can_delete,
				granted_by = excluded.granted_by,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(user_id.to_string())
		.bind(site_id.to_string())
		.bind(flags.can_read as i32)
		.bind(flags.can_create as i32)
		.bind(flags.can_update as i32)
		.bind(flags.can_delete as i32)
		.bind(granted_by.map(|g| g.to_string()))
		.bind(Utc::now().to_rfc3339())
		.execute(&self.pool)
		.await?;

		tracing::debug!("site access updated");
		Ok(())
	}
}

#[async_trait]
impl RbacStore for RbacRepository {
	async fn create_role(
		&self,
		name: &str,
		level: i32,
		permissions: &[&str],
	) -> Result<Role, DbError> {
		self.create_role(name, level, permissions).await
	}

	async fn get_role(&self, id: &RoleId) -> Result<Option<Role>, DbError> {
		self.get_role(id).await
	}

	async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, DbError> {
		self.get_role_by_name(name).await
	}

	async fn create_user(
		&self,
		display_name: &str,
		role_id: Option<&RoleId>,
	) -> Result<User, DbError> {
		self.create_user(display_name, role_id).await
	}

	async fn get_user(&self, id: &UserId) -> Result<Option<User>, DbError> {
		self.get_user(id).await
	}

	async fn set_user_role(
		&self,
		user_id: &UserId,
		role_id: Option<&RoleId>,
	) -> Result<(), DbError> {
		self.set_user_role(user_id, role_id).await
	}

	async fn create_vertical(
		&self,
		code: &str,
		name: &str,
		description: Option<&str>,
	) -> Result<BusinessVertical, DbError> {
		self.create_vertical(code, name, description).await
	}

	async fn get_vertical(
		&self,
		id: &BusinessVerticalId,
	) -> Result<Option<BusinessVertical>, DbError> {
		self.get_vertical(id).await
	}

	async fn find_vertical_by_code(&self, code: &str) -> Result<Option<BusinessVertical>, DbError> {
		self.find_vertical_by_code(code).await
	}

	async fn find_vertical_by_name(&self, name: &str) -> Result<Option<BusinessVertical>, DbError> {
		self.find_vertical_by_name(name).await
	}

	async fn create_business_role(
		&self,
		vertical_id: &BusinessVerticalId,
		name: &str,
		level: i32,
		permissions: &[&str],
	) -> Result<BusinessRole, DbError> {
		self
			.create_business_role(vertical_id, name, level, permissions)
			.await
	}

	async fn get_business_role(
		&self,
		id: &BusinessRoleId,
	) -> Result<Option<BusinessRole>, DbError> {
		self.get_business_role(id).await
	}

	async fn list_active_business_roles(
		&self,
		user_id: &UserId,
	) -> Result<Vec<UserBusinessRole>, DbError> {
		self.list_active_business_roles(user_id).await
	}

	async fn assign_business_role(
		&self,
		user_id: &UserId,
		business_role_id: &BusinessRoleId,
		assigned_by: Option<&UserId>,
	) -> Result<UserBusinessRole, DbError> {
		self
			.assign_business_role(user_id, business_role_id, assigned_by)
			.await
	}

	async fn deactivate_business_role(
		&self,
		user_id: &UserId,
		business_role_id: &BusinessRoleId,
	) -> Result<bool, DbError> {
		self
			.deactivate_business_role(user_id, business_role_id)
			.await
	}

	async fn create_site(
		&self,
		vertical_id: &BusinessVerticalId,
		name: &str,
	) -> Result<Site, DbError> {
		self.create_site(vertical_id, name).await
	}

	async fn get_site(&self, id: &SiteId) -> Result<Option<Site>, DbError> {
		self.get_site(id).await
	}

	async fn list_sites(&self, vertical_id: &BusinessVerticalId) -> Result<Vec<Site>, DbError> {
		self.list_sites(vertical_id).await
	}

	async fn get_site_access(
		&self,
		user_id: &UserId,
		site_id: &SiteId,
	) -> Result<Option<SiteFlags>, DbError> {
		self.get_site_access(user_id, site_id).await
	}

	async fn list_site_access(
		&self,
		user_id: &UserId,
		vertical_id: &BusinessVerticalId,
	) -> Result<Vec<SiteAccess>, DbError> {
		self.list_site_access(user_id, vertical_id).await
	}

	async fn upsert_site_access(
		&self,
		user_id: &UserId,
		site_id: &SiteId,
		flags: SiteFlags,
		granted_by: Option<&UserId>,
	) -> Result<(), DbError> {
		self
			.upsert_site_access(user_id, site_id, flags, granted_by)
			.await
	}
}
