// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization configuration: reserved names and approval defaults.

use serde::Deserialize;

pub const DEFAULT_SUPER_ADMIN_ROLE: &str = "super_admin";
pub const DEFAULT_WILDCARD_PERMISSION: &str = "*:*:*";
pub const DEFAULT_BUSINESS_ADMIN_PERMISSION: &str = "business:admin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthzConfig {
	/// Canonical global role name that grants super-admin.
	pub super_admin_role: String,
	pub wildcard_permission: String,
	pub business_admin_permission: String,
	/// Let a principal's declared role short-circuit super-admin checks
	/// before any store access.
	pub trust_declared_role: bool,
	/// Quorum used when no active workflow matches a request type.
	pub default_required_approvals: u32,
}

impl Default for AuthzConfig {
	fn default() -> Self {
		AuthzConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthzConfigLayer {
	#[serde(default)]
	pub super_admin_role: Option<String>,
	#[serde(default)]
	pub wildcard_permission: Option<String>,
	#[serde(default)]
	pub business_admin_permission: Option<String>,
	#[serde(default)]
	pub trust_declared_role: Option<bool>,
	#[serde(default)]
	pub default_required_approvals: Option<u32>,
}

impl AuthzConfigLayer {
	pub fn merge(&mut self, other: AuthzConfigLayer) {
		if other.super_admin_role.is_some() {
			self.super_admin_role = other.super_admin_role;
		}
		if other.wildcard_permission.is_some() {
			self.wildcard_permission = other.wildcard_permission;
		}
		if other.business_admin_permission.is_some() {
			self.business_admin_permission = other.business_admin_permission;
		}
		if other.trust_declared_role.is_some() {
			self.trust_declared_role = other.trust_declared_role;
		}
		if other.default_required_approvals.is_some() {
			self.default_required_approvals = other.default_required_approvals;
		}
	}

	pub fn finalize(self) -> AuthzConfig {
		AuthzConfig {
			super_admin_role: self
				.super_admin_role
				.unwrap_or_else(|| DEFAULT_SUPER_ADMIN_ROLE.to_string()),
			wildcard_permission: self
				.wildcard_permission
				.unwrap_or_else(|| DEFAULT_WILDCARD_PERMISSION.to_string()),
			business_admin_permission: self
				.business_admin_permission
				.unwrap_or_else(|| DEFAULT_BUSINESS_ADMIN_PERMISSION.to_string()),
			trust_declared_role: self.trust_declared_role.unwrap_or(false),
			default_required_approvals: self.default_required_approvals.unwrap_or(1),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_reserved_names() {
		let config = AuthzConfig::default();
		assert_eq!(config.super_admin_role, "super_admin");
		assert_eq!(config.wildcard_permission, "*:*:*");
		assert_eq!(config.business_admin_permission, "business:admin");
		assert!(!config.trust_declared_role);
		assert_eq!(config.default_required_approvals, 1);
	}

	#[test]
	fn parses_from_toml_table() {
		let layer: AuthzConfigLayer = toml::from_str(
			r#"
			super_admin_role = "root"
			trust_declared_role = true
			"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert_eq!(config.super_admin_role, "root");
		assert!(config.trust_declared_role);
		assert_eq!(config.wildcard_permission, "*:*:*");
	}
}
