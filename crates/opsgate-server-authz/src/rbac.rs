// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! RBAC resolver.
//!
//! Loads a user's global role and active business-role memberships and turns
//! them into [`UserPermissions`]. Role assignment goes through the strict
//! [`can_assign_role`] guard: an actor may only hand out roles whose level is
//! numerically greater (less privileged) than their own.

use std::collections::BTreeSet;
use std::sync::Arc;

use opsgate_authz_core::{
	can_assign_role, resolve_permissions, BusinessContext, BusinessRoleId, BusinessVertical,
	BusinessVerticalId, ReservedNames, Role, RoleId, SiteAccess, SiteCapability, SiteFlags, SiteId,
	UserBusinessRole, UserId, UserPermissions,
};
use opsgate_server_db::RbacStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthzError, Result};
use crate::ownership::OwnershipRegistry;

/// Business permissions of one user in one vertical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessContextView {
	pub business_vertical_id: BusinessVerticalId,
	pub permissions: BTreeSet<String>,
	pub is_business_admin: bool,
	pub is_super_admin: bool,
}

/// Role state loaded for one user.
#[derive(Debug, Clone)]
pub struct SubjectRoles {
	pub user_id: UserId,
	pub role: Option<Role>,
	pub memberships: Vec<UserBusinessRole>,
}

impl SubjectRoles {
	pub fn permissions(
		&self,
		vertical: Option<BusinessVerticalId>,
		reserved: &ReservedNames,
	) -> UserPermissions {
		resolve_permissions(
			self.user_id,
			self.role.as_ref(),
			&self.memberships,
			vertical,
			reserved,
		)
	}
}

#[derive(Clone)]
pub struct RbacService {
	store: Arc<dyn RbacStore>,
	reserved: ReservedNames,
	ownership: OwnershipRegistry,
}

impl RbacService {
	pub fn new(store: Arc<dyn RbacStore>, reserved: ReservedNames) -> Self {
		Self {
			store,
			reserved,
			ownership: OwnershipRegistry::default(),
		}
	}

	pub fn with_ownership(mut self, ownership: OwnershipRegistry) -> Self {
		self.ownership = ownership;
		self
	}

	pub fn reserved(&self) -> &ReservedNames {
		&self.reserved
	}

	pub fn store(&self) -> &Arc<dyn RbacStore> {
		&self.store
	}

	// =========================================================================
	// Resolution
	// =========================================================================

	/// Loads the global role and active memberships of a known user.
	///
	/// # Errors
	/// `AuthzError::Unauthorized` if the user does not exist.
	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn load_subject(&self, user_id: &UserId) -> Result<SubjectRoles> {
		let user = self
			.store
			.get_user(user_id)
			.await?
			.ok_or_else(|| AuthzError::Unauthorized("unknown user".to_string()))?;

		let role = match &user.role_id {
			Some(role_id) => self.store.get_role(role_id).await?,
			None => None,
		};
		let memberships = self.store.list_active_business_roles(user_id).await?;

		Ok(SubjectRoles {
			user_id: *user_id,
			role,
			memberships,
		})
	}

	/// Resolves a vertical by UUID, then code, then name (case-insensitive).
	///
	/// # Errors
	/// `AuthzError::InvalidInput` if nothing matches.
	#[tracing::instrument(skip(self))]
	pub async fn resolve_vertical(&self, input: &str) -> Result<BusinessVertical> {
		let input = input.trim();
		if let Ok(id) = Uuid::parse_str(input) {
			if let Some(vertical) = self.store.get_vertical(&BusinessVerticalId::new(id)).await? {
				return Ok(vertical);
			}
		}
		if let Some(vertical) = self.store.find_vertical_by_code(input).await? {
			return Ok(vertical);
		}
		if let Some(vertical) = self.store.find_vertical_by_name(input).await? {
			return Ok(vertical);
		}
		Err(AuthzError::InvalidInput(format!(
			"unknown business vertical '{input}'"
		)))
	}

	/// Resolves a user's permissions, optionally within a business vertical.
	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn resolve(&self, user_id: &UserId, vertical: Option<&str>) -> Result<UserPermissions> {
		let subject = self.load_subject(user_id).await?;
		let vertical_id = match vertical {
			Some(v) => Some(self.resolve_vertical(v).await?.id),
			None => None,
		};
		Ok(subject.permissions(vertical_id, &self.reserved))
	}

	async fn resolve_in(
		&self,
		user_id: &UserId,
		vertical_id: BusinessVerticalId,
	) -> Result<UserPermissions> {
		let subject = self.load_subject(user_id).await?;
		Ok(subject.permissions(Some(vertical_id), &self.reserved))
	}

	pub async fn is_super_admin(&self, user_id: &UserId) -> Result<bool> {
		Ok(self.resolve(user_id, None).await?.is_super_admin)
	}

	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn resolve_business_context(
		&self,
		user_id: &UserId,
		vertical: &str,
	) -> Result<BusinessContextView> {
		let vertical = self.resolve_vertical(vertical).await?;
		let permissions = self.resolve_in(user_id, vertical.id).await?;
		let is_business_admin = permissions.is_business_admin();
		let business = permissions.business.unwrap_or_else(|| BusinessContext {
			business_vertical_id: vertical.id,
			permissions: BTreeSet::new(),
			is_business_admin: false,
		});

		Ok(BusinessContextView {
			business_vertical_id: vertical.id,
			permissions: business.permissions,
			is_business_admin,
			is_super_admin: permissions.is_super_admin,
		})
	}

	// =========================================================================
	// Sites
	// =========================================================================

	/// Sites of a vertical the user can reach, with per-capability flags.
	///
	/// Super-admins and business admins get every site with all flags set.
	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn accessible_sites(&self, user_id: &UserId, vertical: &str) -> Result<Vec<SiteAccess>> {
		let vertical = self.resolve_vertical(vertical).await?;
		let permissions = self.resolve_in(user_id, vertical.id).await?;

		if permissions.is_business_admin() {
			let sites = self.store.list_sites(&vertical.id).await?;
			return Ok(sites
				.into_iter()
				.map(|site| SiteAccess {
					site_id: site.id,
					flags: SiteFlags::all(),
				})
				.collect());
		}

		Ok(self.store.list_site_access(user_id, &vertical.id).await?)
	}

	#[tracing::instrument(skip(self), fields(user_id = %user_id, site_id = %site_id, capability = %capability))]
	pub async fn check_site_access(
		&self,
		user_id: &UserId,
		site_id: &SiteId,
		capability: SiteCapability,
	) -> Result<bool> {
		let site = self
			.store
			.get_site(site_id)
			.await?
			.ok_or_else(|| AuthzError::NotFound(format!("site {site_id}")))?;
		let permissions = self.resolve_in(user_id, site.business_vertical_id).await?;
		if permissions.is_business_admin() {
			return Ok(true);
		}

		let flags = self.store.get_site_access(user_id, site_id).await?;
		Ok(flags.is_some_and(|f| f.allows(capability)))
	}

	/// Grants or replaces a user's flags on a site.
	///
	/// The actor must be a super-admin or a business admin of the site's vertical.
	#[tracing::instrument(skip(self), fields(actor = %actor, user_id = %user_id, site_id = %site_id))]
	pub async fn grant_site_access(
		&self,
		actor: &UserId,
		user_id: &UserId,
		site_id: &SiteId,
		flags: SiteFlags,
	) -> Result<()> {
		let site = self
			.store
			.get_site(site_id)
			.await?
			.ok_or_else(|| AuthzError::NotFound(format!("site {site_id}")))?;
		let actor_permissions = self.resolve_in(actor, site.business_vertical_id).await?;
		if !actor_permissions.is_business_admin() {
			return Err(AuthzError::Unauthorized(
				"site grants require business admin".to_string(),
			));
		}
		self.require_user(user_id).await?;

		self
			.store
			.upsert_site_access(user_id, site_id, flags, Some(actor))
			.await?;
		tracing::debug!("site access granted");
		Ok(())
	}

	// =========================================================================
	// Role assignment
	// =========================================================================

	async fn require_user(&self, user_id: &UserId) -> Result<()> {
		self
			.store
			.get_user(user_id)
			.await?
			.map(|_| ())
			.ok_or_else(|| AuthzError::NotFound(format!("user {user_id}")))
	}

	async fn guard_assignment(&self, actor: &UserId, target_level: i32) -> Result<()> {
		let actor_level = self.resolve(actor, None).await?.role_level;
		if !can_assign_role(actor_level, target_level) {
			tracing::warn!(
				actor = %actor,
				actor_level,
				target_level,
				"role assignment rejected"
			);
			return Err(AuthzError::Unauthorized(format!(
				"cannot manage a role at level {target_level} from level {actor_level}"
			)));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(actor = %actor, user_id = %user_id, role_id = %role_id))]
	pub async fn assign_global_role(
		&self,
		actor: &UserId,
		user_id: &UserId,
		role_id: &RoleId,
	) -> Result<()> {
		let role = self
			.store
			.get_role(role_id)
			.await?
			.ok_or_else(|| AuthzError::NotFound(format!("role {role_id}")))?;
		self.guard_assignment(actor, role.level).await?;
		self.require_user(user_id).await?;

		self.store.set_user_role(user_id, Some(role_id)).await?;
		tracing::debug!(role = %role.name, "global role assigned");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(actor = %actor, user_id = %user_id, business_role_id = %business_role_id))]
	pub async fn assign_business_role(
		&self,
		actor: &UserId,
		user_id: &UserId,
		business_role_id: &BusinessRoleId,
	) -> Result<UserBusinessRole> {
		let role = self
			.store
			.get_business_role(business_role_id)
			.await?
			.ok_or_else(|| AuthzError::NotFound(format!("business role {business_role_id}")))?;
		self.guard_assignment(actor, role.level).await?;
		self.require_user(user_id).await?;

		let membership = self
			.store
			.assign_business_role(user_id, business_role_id, Some(actor))
			.await?;
		tracing::debug!(role = %role.name, "business role assigned");
		Ok(membership)
	}

	#[tracing::instrument(skip(self), fields(actor = %actor, user_id = %user_id, business_role_id = %business_role_id))]
	pub async fn deactivate_business_role(
		&self,
		actor: &UserId,
		user_id: &UserId,
		business_role_id: &BusinessRoleId,
	) -> Result<()> {
		let role = self
			.store
			.get_business_role(business_role_id)
			.await?
			.ok_or_else(|| AuthzError::NotFound(format!("business role {business_role_id}")))?;
		self.guard_assignment(actor, role.level).await?;

		if !self
			.store
			.deactivate_business_role(user_id, business_role_id)
			.await?
		{
			return Err(AuthzError::NotFound(
				"no active assignment of that business role".to_string(),
			));
		}
		tracing::debug!(role = %role.name, "business role deactivated");
		Ok(())
	}

	// =========================================================================
	// Ownership
	// =========================================================================

	pub async fn is_resource_owner(
		&self,
		user_id: &UserId,
		resource_type: &str,
		resource_id: &str,
	) -> Result<bool> {
		self
			.ownership
			.is_resource_owner(user_id, resource_type, resource_id)
			.await
	}
}
