// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Hybrid authorization: super-admin bypass, then RBAC, then ABAC.

use std::collections::BTreeMap;

use opsgate_authz_core::{PolicyEffect, PolicyId, UserId, NO_MATCHING_POLICIES};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{EvaluationRequest, PolicyEngine};
use crate::error::{AuthzError, Result};
use crate::rbac::RbacService;

/// The caller as asserted by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
	pub subject_id: String,
	#[serde(default)]
	pub role: Option<String>,
}

impl Principal {
	pub fn new(subject_id: impl Into<String>) -> Self {
		Self {
			subject_id: subject_id.into(),
			role: None,
		}
	}

	pub fn with_role(mut self, role: impl Into<String>) -> Self {
		self.role = Some(role.into());
		self
	}
}

impl From<UserId> for Principal {
	fn from(id: UserId) -> Self {
		Self::new(id.to_string())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
	pub principal: Principal,
	/// Also the required permission, by `resource:action` convention.
	pub action: String,
	pub resource_type: String,
	#[serde(default)]
	pub resource_id: Option<String>,
	/// UUID, code or name of a business vertical.
	#[serde(default)]
	pub business_vertical: Option<String>,
	#[serde(default)]
	pub environment: BTreeMap<String, Value>,
}

impl AuthorizationRequest {
	pub fn new(
		principal: impl Into<Principal>,
		action: impl Into<String>,
		resource_type: impl Into<String>,
	) -> Self {
		Self {
			principal: principal.into(),
			action: action.into(),
			resource_type: resource_type.into(),
			resource_id: None,
			business_vertical: None,
			environment: BTreeMap::new(),
		}
	}

	pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
		self.resource_id = Some(resource_id.into());
		self
	}

	pub fn in_vertical(mut self, vertical: impl Into<String>) -> Self {
		self.business_vertical = Some(vertical.into());
		self
	}

	pub fn with_environment(mut self, key: impl Into<String>, value: Value) -> Self {
		self.environment.insert(key.into(), value);
		self
	}
}

/// Which stage produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStage {
	SuperAdmin,
	Rbac,
	Abac,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
	pub allowed: bool,
	pub reason: String,
	pub matched_policies: Vec<PolicyId>,
	pub effect: PolicyEffect,
	pub stage: DecisionStage,
}

impl Decision {
	fn super_admin() -> Self {
		Self {
			allowed: true,
			reason: "super admin".to_string(),
			matched_policies: Vec::new(),
			effect: PolicyEffect::Allow,
			stage: DecisionStage::SuperAdmin,
		}
	}

	fn missing_permission(action: &str) -> Self {
		Self {
			allowed: false,
			reason: format!("missing permission {action}"),
			matched_policies: Vec::new(),
			effect: PolicyEffect::Deny,
			stage: DecisionStage::Rbac,
		}
	}
}

#[derive(Clone)]
pub struct Authorizer {
	rbac: RbacService,
	engine: PolicyEngine,
	trust_declared_role: bool,
}

impl Authorizer {
	pub fn new(rbac: RbacService, engine: PolicyEngine) -> Self {
		Self {
			rbac,
			engine,
			trust_declared_role: false,
		}
	}

	/// Lets a principal's declared super-admin role skip every store lookup.
	pub fn trust_declared_role(mut self, trust: bool) -> Self {
		self.trust_declared_role = trust;
		self
	}

	pub fn trusts_declared_role(&self) -> bool {
		self.trust_declared_role
	}

	pub fn rbac(&self) -> &RbacService {
		&self.rbac
	}

	pub fn engine(&self) -> &PolicyEngine {
		&self.engine
	}

	/// # Errors
	/// - `AuthzError::Unauthorized` if the subject id is not a UUID or the user is unknown
	/// - `AuthzError::InvalidInput` if the business vertical cannot be resolved
	#[tracing::instrument(
		skip(self, request),
		fields(subject_id = %request.principal.subject_id, action = %request.action, resource_type = %request.resource_type)
	)]
	pub async fn authorize(&self, request: &AuthorizationRequest) -> Result<Decision> {
		if self.trust_declared_role
			&& request.principal.role.as_deref() == Some(self.rbac.reserved().super_admin_role.as_str())
		{
			tracing::debug!("declared super admin");
			return Ok(Decision::super_admin());
		}

		let user_id: UserId = request
			.principal
			.subject_id
			.trim()
			.parse()
			.map_err(|_| AuthzError::Unauthorized("invalid subject id".to_string()))?;

		let subject = self.rbac.load_subject(&user_id).await?;
		if subject.permissions(None, self.rbac.reserved()).is_super_admin {
			tracing::debug!("super admin");
			return Ok(Decision::super_admin());
		}

		let vertical = match &request.business_vertical {
			Some(v) => Some(self.rbac.resolve_vertical(v).await?.id),
			None => None,
		};
		let permissions = subject.permissions(vertical, self.rbac.reserved());
		if !permissions.allows(&request.action) {
			tracing::debug!("missing permission");
			return Ok(Decision::missing_permission(&request.action));
		}

		let evaluation = EvaluationRequest {
			subject_id: user_id,
			action: request.action.clone(),
			resource_type: request.resource_type.clone(),
			resource_id: request.resource_id.clone(),
			environment: request.environment.clone(),
			business_vertical: vertical,
		};
		let decision = self.engine.evaluate(&evaluation).await?;

		let reason = if decision.allowed {
			"allowed by policy"
		} else if decision.matched_policies.is_empty() {
			NO_MATCHING_POLICIES
		} else {
			"denied by policy"
		};
		Ok(Decision {
			allowed: decision.allowed,
			reason: reason.to_string(),
			matched_policies: decision.matched_policies,
			effect: decision.effect,
			stage: DecisionStage::Abac,
		})
	}
}
