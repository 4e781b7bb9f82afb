// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core type definitions shared by every Opsgate crate.
//!
//! - **ID newtypes**: Type-safe wrappers around UUIDs for each entity
//!   ([`UserId`], [`PolicyId`], [`BusinessVerticalId`], etc.)
//! - **String enums**: Closed vocabularies persisted as lowercase text
//!   ([`PolicyEffect`], [`PolicyStatus`], [`ApprovalStatus`], ...)
//!
//! All ID types implement transparent serde serialization (as UUID strings) and
//! parse from their string form via [`std::str::FromStr`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// ID Newtypes
// =============================================================================

macro_rules! define_id_type {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			/// Create a new ID from a UUID.
			pub fn new(id: Uuid) -> Self {
				Self(id)
			}

			/// Generate a new random ID.
			pub fn generate() -> Self {
				Self(Uuid::new_v4())
			}

			/// Get the inner UUID value.
			pub fn into_inner(self) -> Uuid {
				self.0
			}

			/// Get a reference to the inner UUID.
			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = uuid::Error;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Uuid::parse_str(s.trim()).map(Self)
			}
		}

		impl From<Uuid> for $name {
			fn from(id: Uuid) -> Self {
				Self(id)
			}
		}

		impl From<$name> for Uuid {
			fn from(id: $name) -> Self {
				id.0
			}
		}
	};
}

define_id_type!(UserId, "Unique identifier for a user.");
define_id_type!(RoleId, "Unique identifier for a global role.");
define_id_type!(PermissionId, "Unique identifier for a permission.");
define_id_type!(BusinessVerticalId, "Unique identifier for a business vertical.");
define_id_type!(BusinessRoleId, "Unique identifier for a vertical-scoped role.");
define_id_type!(SiteId, "Unique identifier for a site.");
define_id_type!(AttributeId, "Unique identifier for an attribute definition.");
define_id_type!(AssignmentId, "Unique identifier for an attribute assignment row.");
define_id_type!(PolicyId, "Unique identifier for an ABAC policy.");
define_id_type!(WorkflowId, "Unique identifier for an approval workflow.");
define_id_type!(ApprovalRequestId, "Unique identifier for a policy approval request.");
define_id_type!(ApprovalId, "Unique identifier for a single approver decision.");

// =============================================================================
// String Enums
// =============================================================================

/// Error returned when a persisted enum string is not a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
	pub kind: &'static str,
	pub value: String,
}

macro_rules! define_str_enum {
	(
		$(#[$meta:meta])*
		$name:ident, $kind:expr, { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
	) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(rename_all = "snake_case")]
		pub enum $name {
			$($(#[$vmeta])* $variant),+
		}

		impl $name {
			/// Returns every variant in declaration order.
			pub fn all() -> &'static [$name] {
				&[$($name::$variant),+]
			}

			/// Returns the persisted string form.
			pub fn as_str(&self) -> &'static str {
				match self {
					$($name::$variant => $text),+
				}
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(self.as_str())
			}
		}

		impl FromStr for $name {
			type Err = ParseEnumError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				match s.trim().to_ascii_lowercase().as_str() {
					$($text => Ok($name::$variant),)+
					_ => Err(ParseEnumError {
						kind: $kind,
						value: s.to_string(),
					}),
				}
			}
		}
	};
}

define_str_enum!(
	/// Effect a policy contributes when its condition tree matches.
	PolicyEffect, "policy effect", {
		Allow => "allow",
		Deny => "deny",
	}
);

define_str_enum!(
	/// Lifecycle status of a policy. Only `Active` policies are evaluated.
	PolicyStatus, "policy status", {
		Draft => "draft",
		Active => "active",
		Inactive => "inactive",
	}
);

define_str_enum!(
	/// Kind of policy change an approval request governs.
	ApprovalRequestType, "approval request type", {
		Create => "create",
		Update => "update",
		Activate => "activate",
		Deactivate => "deactivate",
		Delete => "delete",
	}
);

define_str_enum!(
	/// State of an approval request. `Approved` and `Rejected` are terminal.
	ApprovalStatus, "approval status", {
		Pending => "pending",
		Approved => "approved",
		Rejected => "rejected",
	}
);

define_str_enum!(
	/// A single approver's vote.
	ApprovalDecision, "approval decision", {
		Approve => "approve",
		Reject => "reject",
	}
);

define_str_enum!(
	/// Whether an attribute definition attaches to users or resources.
	AttributeScope, "attribute scope", {
		User => "user",
		Resource => "resource",
	}
);

define_str_enum!(
	/// Declared value type of an attribute, used when building the evaluation context.
	AttributeDataType, "attribute data type", {
		String => "string",
		Number => "number",
		Boolean => "boolean",
		List => "list",
	}
);

define_str_enum!(
	/// CRUD capability granted on a site.
	SiteCapability, "site capability", {
		Read => "read",
		Create => "create",
		Update => "update",
		Delete => "delete",
	}
);

impl ApprovalStatus {
	/// Returns true once the request can no longer change.
	pub fn is_terminal(&self) -> bool {
		!matches!(self, ApprovalStatus::Pending)
	}
}
