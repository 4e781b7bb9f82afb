// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization services for Opsgate.
//!
//! This crate wires the pure primitives of `opsgate-authz-core` to the SQLite
//! stores of `opsgate-server-db`:
//!
//! - [`RbacService`]: role and permission resolution, role assignment, sites
//! - [`AttributeService`]: attribute definitions and time-bounded values
//! - [`PolicyEngine`]: ABAC evaluation and policy administration
//! - [`ApprovalService`]: multi-party approval of policy changes
//! - [`Authorizer`]: the hybrid super-admin / RBAC / ABAC decision
//!
//! [`AuthzServices::new`] builds all of them from one pool and a
//! [`ServerConfig`].

pub mod approval;
pub mod attributes;
pub mod authorizer;
pub mod engine;
pub mod error;
pub mod ownership;
pub mod rbac;

use std::sync::Arc;

use opsgate_authz_core::ReservedNames;
use opsgate_server_audit::{AuditService, AuditSink, SqliteAuditSink, TracingAuditSink};
use opsgate_server_config::{AuditConfig, AuthzConfig, ServerConfig};
use opsgate_server_db::{
	ApprovalRepository, AttributeRepository, EvaluationRepository, PolicyRepository, RbacRepository,
};
use sqlx::SqlitePool;

pub use approval::{ApprovalEligibility, ApprovalService, PermissionEligibility};
pub use attributes::AttributeService;
pub use authorizer::{AuthorizationRequest, Authorizer, Decision, DecisionStage, Principal};
pub use engine::{EvaluationRequest, PolicyEngine, PolicyTestResult};
pub use error::{AuthzError, Result};
pub use ownership::{OwnerLookup, OwnershipRegistry};
pub use rbac::{BusinessContextView, RbacService, SubjectRoles};

pub fn reserved_names(config: &AuthzConfig) -> ReservedNames {
	ReservedNames {
		super_admin_role: config.super_admin_role.clone(),
		wildcard_permission: config.wildcard_permission.clone(),
		business_admin_permission: config.business_admin_permission.clone(),
	}
}

/// Starts the audit pipeline, or returns `None` when auditing is disabled.
///
/// Must be called from within a Tokio runtime.
pub fn start_audit(pool: &SqlitePool, config: &AuditConfig) -> Option<Arc<AuditService>> {
	if !config.enabled {
		tracing::info!("audit disabled");
		return None;
	}
	let mut sinks: Vec<Arc<dyn AuditSink>> = vec![Arc::new(SqliteAuditSink::new(pool.clone()))];
	if config.tracing_sink {
		sinks.push(Arc::new(TracingAuditSink::new()));
	}
	Some(Arc::new(AuditService::from_config(config, sinks)))
}

/// Every authorization service over one database.
#[derive(Clone)]
pub struct AuthzServices {
	pub rbac: RbacService,
	pub attributes: AttributeService,
	pub engine: PolicyEngine,
	pub approvals: ApprovalService,
	pub authorizer: Authorizer,
}

impl AuthzServices {
	pub fn new(pool: SqlitePool, config: &ServerConfig, audit: Option<Arc<AuditService>>) -> Self {
		let policies = Arc::new(PolicyRepository::new(pool.clone()));

		let rbac = RbacService::new(
			Arc::new(RbacRepository::new(pool.clone())),
			reserved_names(&config.authz),
		);
		let attributes = AttributeService::new(Arc::new(AttributeRepository::new(pool.clone())));

		let mut engine = PolicyEngine::new(
			policies.clone(),
			attributes.clone(),
			Arc::new(EvaluationRepository::new(pool.clone())),
		);
		if let Some(audit) = audit {
			engine = engine.with_audit(audit);
		}

		let approvals = ApprovalService::new(Arc::new(ApprovalRepository::new(pool)), policies)
			.with_default_required_approvals(config.authz.default_required_approvals);

		let authorizer = Authorizer::new(rbac.clone(), engine.clone())
			.trust_declared_role(config.authz.trust_declared_role);

		Self {
			rbac,
			attributes,
			engine,
			approvals,
			authorizer,
		}
	}

	/// Replaces the ownership lookups used by the RBAC resolver.
	pub fn with_ownership(mut self, ownership: OwnershipRegistry) -> Self {
		self.rbac = self.rbac.with_ownership(ownership);
		self.authorizer = Authorizer::new(self.rbac.clone(), self.engine.clone())
			.trust_declared_role(self.authorizer.trusts_declared_role());
		self
	}
}
