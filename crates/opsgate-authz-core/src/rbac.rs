// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Role-based access control records and the rules computed over them.
//!
//! Storage hands these records to the resolver; everything here is pure so the
//! super-admin rule, business-admin rule and role-hierarchy guard can be tested
//! without a database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::permission::{has_permission, holds_exact};
use crate::types::{
	BusinessRoleId, BusinessVerticalId, RoleId, SiteCapability, SiteId, UserId,
};

/// Hierarchy level of a user holding no role at all.
///
/// Lower numbers are more privileged, so this is the least privileged level.
pub const LOWEST_PRIVILEGE_LEVEL: i32 = 100;

/// Reserved names that carry special meaning during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedNames {
	/// Global role name that makes its holder a super-administrator.
	pub super_admin_role: String,
	/// Permission that grants everything; holding it also makes a super-administrator.
	pub wildcard_permission: String,
	/// Business-scoped permission that makes its holder a business administrator.
	pub business_admin_permission: String,
}

impl Default for ReservedNames {
	fn default() -> Self {
		Self {
			super_admin_role: "super_admin".to_string(),
			wildcard_permission: "*:*:*".to_string(),
			business_admin_permission: "business:admin".to_string(),
		}
	}
}

/// A user as seen by the authorization core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	pub id: UserId,
	pub display_name: String,
	pub role_id: Option<RoleId>,
	pub created_at: DateTime<Utc>,
}

/// A global role and its permission names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
	pub id: RoleId,
	pub name: String,
	pub level: i32,
	pub permissions: BTreeSet<String>,
}

/// A tenant-like partition of the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessVertical {
	pub id: BusinessVerticalId,
	pub code: String,
	pub name: String,
	pub description: Option<String>,
	pub created_at: DateTime<Utc>,
}

/// A role scoped to exactly one business vertical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessRole {
	pub id: BusinessRoleId,
	pub business_vertical_id: BusinessVerticalId,
	pub name: String,
	pub level: i32,
	pub permissions: BTreeSet<String>,
}

/// A user's membership in a business role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBusinessRole {
	pub id: uuid::Uuid,
	pub user_id: UserId,
	pub business_role: BusinessRole,
	pub active: bool,
	pub assigned_by: Option<UserId>,
	pub created_at: DateTime<Utc>,
}

/// A physical location inside a business vertical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
	pub id: SiteId,
	pub business_vertical_id: BusinessVerticalId,
	pub name: String,
}

/// Per-site CRUD capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SiteFlags {
	pub can_read: bool,
	pub can_create: bool,
	pub can_update: bool,
	pub can_delete: bool,
}

impl SiteFlags {
	/// Every capability granted.
	pub fn all() -> Self {
		Self {
			can_read: true,
			can_create: true,
			can_update: true,
			can_delete: true,
		}
	}

	/// Returns true if the flag for `capability` is set.
	pub fn allows(&self, capability: SiteCapability) -> bool {
		match capability {
			SiteCapability::Read => self.can_read,
			SiteCapability::Create => self.can_create,
			SiteCapability::Update => self.can_update,
			SiteCapability::Delete => self.can_delete,
		}
	}
}

/// A user's capabilities on one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteAccess {
	pub site_id: SiteId,
	#[serde(flatten)]
	pub flags: SiteFlags,
}

/// Permissions a user holds inside one business vertical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessContext {
	pub business_vertical_id: BusinessVerticalId,
	pub permissions: BTreeSet<String>,
	pub is_business_admin: bool,
}

/// The resolved RBAC view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermissions {
	pub user_id: UserId,
	pub is_super_admin: bool,
	pub global_permissions: BTreeSet<String>,
	pub business: Option<BusinessContext>,
	pub role_level: i32,
}

impl UserPermissions {
	/// Returns true if the user may perform `required` based on roles alone.
	///
	/// Super-admins always pass. Otherwise the global set is consulted first,
	/// then the business set when a vertical was resolved.
	pub fn allows(&self, required: &str) -> bool {
		if self.is_super_admin {
			return true;
		}
		if has_permission(&self.global_permissions, required) {
			return true;
		}
		self
			.business
			.as_ref()
			.is_some_and(|ctx| has_permission(&ctx.permissions, required))
	}

	/// Returns true if the user administers the resolved vertical (or is a super-admin).
	pub fn is_business_admin(&self) -> bool {
		self.is_super_admin || self.business.as_ref().is_some_and(|ctx| ctx.is_business_admin)
	}
}

/// Returns true if a user at `user_level` may grant a role at `target_level`.
///
/// The target must be strictly less privileged (numerically greater).
pub fn can_assign_role(user_level: i32, target_level: i32) -> bool {
	target_level > user_level
}

/// Returns true if the global role or its permissions make the holder a super-admin.
pub fn is_super_admin(role: Option<&Role>, reserved: &ReservedNames) -> bool {
	role.is_some_and(|role| {
		role.name == reserved.super_admin_role
			|| holds_exact(&role.permissions, &reserved.wildcard_permission)
	})
}

/// Union of permissions across the active memberships that belong to `vertical`.
pub fn business_permissions(
	memberships: &[UserBusinessRole],
	vertical: BusinessVerticalId,
) -> BTreeSet<String> {
	memberships
		.iter()
		.filter(|m| m.active && m.business_role.business_vertical_id == vertical)
		.flat_map(|m| m.business_role.permissions.iter().cloned())
		.collect()
}

/// Highest-privilege (minimum) level across the global role and every active membership.
pub fn effective_role_level(role: Option<&Role>, memberships: &[UserBusinessRole]) -> i32 {
	role
		.map(|r| r.level)
		.into_iter()
		.chain(
			memberships
				.iter()
				.filter(|m| m.active)
				.map(|m| m.business_role.level),
		)
		.min()
		.unwrap_or(LOWEST_PRIVILEGE_LEVEL)
}

/// Builds the resolved view from loaded records.
pub fn resolve_permissions(
	user_id: UserId,
	role: Option<&Role>,
	memberships: &[UserBusinessRole],
	vertical: Option<BusinessVerticalId>,
	reserved: &ReservedNames,
) -> UserPermissions {
	let role_level = effective_role_level(role, memberships);

	if is_super_admin(role, reserved) {
		let everything: BTreeSet<String> = [reserved.wildcard_permission.clone()].into();
		return UserPermissions {
			user_id,
			is_super_admin: true,
			global_permissions: everything.clone(),
			business: vertical.map(|id| BusinessContext {
				business_vertical_id: id,
				permissions: everything,
				is_business_admin: true,
			}),
			role_level,
		};
	}

	let global_permissions = role.map(|r| r.permissions.clone()).unwrap_or_default();

	let business = vertical.map(|id| {
		let permissions = business_permissions(memberships, id);
		let is_business_admin = holds_exact(&permissions, &reserved.business_admin_permission);
		BusinessContext {
			business_vertical_id: id,
			permissions,
			is_business_admin,
		}
	});

	UserPermissions {
		user_id,
		is_super_admin: false,
		global_permissions,
		business,
		role_level,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn role(name: &str, level: i32, perms: &[&str]) -> Role {
		Role {
			id: RoleId::generate(),
			name: name.to_string(),
			level,
			permissions: perms.iter().map(|s| s.to_string()).collect(),
		}
	}

	fn membership(
		vertical: BusinessVerticalId,
		level: i32,
		perms: &[&str],
		active: bool,
	) -> UserBusinessRole {
		UserBusinessRole {
			id: uuid::Uuid::new_v4(),
			user_id: UserId::generate(),
			business_role: BusinessRole {
				id: BusinessRoleId::generate(),
				business_vertical_id: vertical,
				name: "role".to_string(),
				level,
				permissions: perms.iter().map(|s| s.to_string()).collect(),
			},
			active,
			assigned_by: None,
			created_at: Utc::now(),
		}
	}

	#[test]
	fn can_assign_role_is_strict() {
		assert!(!can_assign_role(2, 1));
		assert!(can_assign_role(2, 3));
		assert!(!can_assign_role(0, 0));
	}

	proptest! {
		#[test]
		fn can_assign_role_never_grants_equal_or_higher(user in -1000i32..1000, target in -1000i32..1000) {
			prop_assert_eq!(can_assign_role(user, target), target > user);
			prop_assert!(!can_assign_role(user, user));
		}
	}

	#[test]
	fn super_admin_by_role_name() {
		let reserved = ReservedNames::default();
		let admin = role("super_admin", 0, &[]);
		assert!(is_super_admin(Some(&admin), &reserved));
	}

	#[test]
	fn super_admin_name_is_exact() {
		let reserved = ReservedNames::default();
		assert!(!is_super_admin(Some(&role("Super Admin", 0, &[])), &reserved));
		assert!(!is_super_admin(None, &reserved));
	}

	#[test]
	fn super_admin_by_wildcard_permission() {
		let reserved = ReservedNames::default();
		let ops = role("ops", 1, &["*:*:*"]);
		assert!(is_super_admin(Some(&ops), &reserved));
	}

	#[test]
	fn super_admin_resolution_grants_wildcard() {
		let reserved = ReservedNames::default();
		let vertical = BusinessVerticalId::generate();
		let resolved = resolve_permissions(
			UserId::generate(),
			Some(&role("super_admin", 0, &[])),
			&[],
			Some(vertical),
			&reserved,
		);
		assert!(resolved.is_super_admin);
		assert!(resolved.global_permissions.contains("*:*:*"));
		assert!(resolved.is_business_admin());
		assert!(resolved.allows("anything:at:all"));
	}

	#[test]
	fn business_permissions_ignore_inactive_and_other_verticals() {
		let v1 = BusinessVerticalId::generate();
		let v2 = BusinessVerticalId::generate();
		let memberships = vec![
			membership(v1, 10, &["project:read"], true),
			membership(v1, 10, &["project:update"], true),
			membership(v1, 10, &["project:delete"], false),
			membership(v2, 10, &["payment:read"], true),
		];
		let perms = business_permissions(&memberships, v1);
		let expected: BTreeSet<String> = ["project:read", "project:update"]
			.iter()
			.map(|s| s.to_string())
			.collect();
		assert_eq!(perms, expected);
	}

	#[test]
	fn business_admin_requires_reserved_permission() {
		let reserved = ReservedNames::default();
		let vertical = BusinessVerticalId::generate();
		let memberships = vec![membership(vertical, 5, &["business:admin"], true)];
		let resolved = resolve_permissions(
			UserId::generate(),
			None,
			&memberships,
			Some(vertical),
			&reserved,
		);
		assert!(!resolved.is_super_admin);
		assert!(resolved.is_business_admin());
	}

	#[test]
	fn role_level_is_minimum_of_active_roles() {
		let vertical = BusinessVerticalId::generate();
		let memberships = vec![
			membership(vertical, 7, &[], true),
			membership(vertical, 1, &[], false),
		];
		assert_eq!(effective_role_level(Some(&role("staff", 20, &[])), &memberships), 7);
		assert_eq!(effective_role_level(None, &[]), LOWEST_PRIVILEGE_LEVEL);
	}

	#[test]
	fn allows_checks_global_then_business() {
		let reserved = ReservedNames::default();
		let vertical = BusinessVerticalId::generate();
		let memberships = vec![membership(vertical, 10, &["project:read"], true)];
		let resolved = resolve_permissions(
			UserId::generate(),
			Some(&role("staff", 20, &["profile:*"])),
			&memberships,
			Some(vertical),
			&reserved,
		);
		assert!(resolved.allows("profile:update"));
		assert!(resolved.allows("project:read"));
		assert!(!resolved.allows("project:delete"));
	}

	#[test]
	fn site_flags_allow_by_capability() {
		let flags = SiteFlags {
			can_read: true,
			can_update: true,
			..Default::default()
		};
		assert!(flags.allows(SiteCapability::Read));
		assert!(flags.allows(SiteCapability::Update));
		assert!(!flags.allows(SiteCapability::Create));
		assert!(!flags.allows(SiteCapability::Delete));
		assert!(SiteFlags::all().allows(SiteCapability::Delete));
	}
}
