// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pure authorization primitives for Opsgate.
//!
//! Nothing in this crate touches storage or spawns tasks; the server crates
//! load records and hand them to the functions here.

pub mod approval;
pub mod attribute;
pub mod condition;
pub mod context;
pub mod decision;
pub mod permission;
pub mod policy;
pub mod rbac;
pub mod types;

pub use approval::{
	select_workflow, tally, ApprovalRequest, ApprovalWorkflow, PolicyApproval, PolicyChangeLog,
	PolicyVersion, VoteOutcome, DEFAULT_REQUIRED_APPROVALS,
};
pub use attribute::{is_within_window, typed_value, Attribute, AttributeAssignment, AttributeSubject};
pub use condition::{ConditionError, ConditionNode, Operator, Pattern};
pub use context::{build_context, AttributeContext, ContextInputs};
pub use decision::{
	combine, DecisionBuilder, PolicyDecision, PolicyError, PolicyEvaluation, NO_MATCHING_POLICIES,
};
pub use permission::{has_permission, permission_matches, target_matches};
pub use policy::{evaluation_order, NewPolicy, Policy, PolicyChanges, PolicyFilter, PolicyInputError};
pub use rbac::{
	can_assign_role, is_super_admin, resolve_permissions, BusinessContext, BusinessRole,
	BusinessVertical, ReservedNames, Role, Site, SiteAccess, SiteFlags, User, UserBusinessRole,
	UserPermissions, LOWEST_PRIVILEGE_LEVEL,
};
pub use types::*;
