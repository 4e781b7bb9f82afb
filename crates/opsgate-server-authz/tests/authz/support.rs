// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use opsgate_authz_core::{
	ApprovalRequestType, BusinessVertical, ConditionNode, NewPolicy, Policy, PolicyEffect,
	PolicyEvaluation, PolicyId, User,
};
use opsgate_server_audit::{AuditService, QueueOverflowPolicy, SqliteAuditSink};
use opsgate_server_authz::{AuthorizationRequest, AuthzServices, Decision, DecisionStage};
use opsgate_server_config::ServerConfig;
use opsgate_server_db::testing::create_test_pool;
use opsgate_server_db::RbacRepository;
use serde_json::Value;
use sqlx::SqlitePool;

pub struct Fixtures {
	/// Global role named `super_admin`.
	pub super_admin: User,
	/// Global role holding `*:*:*`.
	pub root: User,
	/// Global `project:*`.
	pub staff: User,
	/// No global role; `site:update` in the retail vertical.
	pub clerk: User,
	pub retail: BusinessVertical,
}

pub struct TestApp {
	pub pool: SqlitePool,
	pub services: AuthzServices,
	pub rbac: Arc<RbacRepository>,
	pub fixtures: Fixtures,
}

impl TestApp {
	pub async fn new() -> Self {
		Self::with_config(ServerConfig::default()).await
	}

	pub async fn with_config(config: ServerConfig) -> Self {
		let pool = create_test_pool().await;
		let audit = Arc::new(AuditService::new(
			64,
			QueueOverflowPolicy::Block,
			vec![Arc::new(SqliteAuditSink::new(pool.clone()))],
		));
		let services = AuthzServices::new(pool.clone(), &config, Some(audit));
		let rbac = Arc::new(RbacRepository::new(pool.clone()));
		let fixtures = seed(&rbac).await;

		Self {
			pool,
			services,
			rbac,
			fixtures,
		}
	}

	pub async fn authorize(&self, request: AuthorizationRequest) -> Decision {
		self
			.services
			.authorizer
			.authorize(&request)
			.await
			.expect("authorize failed")
	}

	/// Creates a draft policy and activates it through a one-vote approval.
	pub async fn activate(&self, input: NewPolicy) -> Policy {
		let policy = self
			.services
			.engine
			.create_policy(input, Some(self.fixtures.staff.id))
			.await
			.expect("create policy");
		let request = self
			.services
			.approvals
			.create_request(
				&policy.id,
				ApprovalRequestType::Activate,
				&self.fixtures.staff.id,
				None,
				None,
			)
			.await
			.expect("create request");
		self
			.services
			.approvals
			.approve(&request.id, &self.fixtures.root.id, None)
			.await
			.expect("approve");
		self
			.services
			.engine
			.get_policy(&policy.id)
			.await
			.expect("reload policy")
	}
}

async fn seed(rbac: &RbacRepository) -> Fixtures {
	let super_role = rbac.create_role("super_admin", 0, &[]).await.unwrap();
	let root_role = rbac.create_role("root", 1, &["*:*:*"]).await.unwrap();
	let staff_role = rbac
		.create_role("staff", 50, &["project:*", "report:read"])
		.await
		.unwrap();

	let retail = rbac
		.create_vertical("RETAIL", "Retail Operations", None)
		.await
		.unwrap();
	let editor = rbac
		.create_business_role(&retail.id, "site-editor", 60, &["site:update", "site:read"])
		.await
		.unwrap();

	let super_admin = rbac.create_user("Sasha", Some(&super_role.id)).await.unwrap();
	let root = rbac.create_user("Rory", Some(&root_role.id)).await.unwrap();
	let staff = rbac.create_user("Sam", Some(&staff_role.id)).await.unwrap();
	let clerk = rbac.create_user("Casey", None).await.unwrap();
	rbac.assign_business_role(&clerk.id, &editor.id, None).await.unwrap();

	Fixtures {
		super_admin,
		root,
		staff,
		clerk,
		retail,
	}
}

pub fn policy(name: &str, effect: PolicyEffect, actions: &[&str], condition: Value) -> NewPolicy {
	NewPolicy {
		name: name.to_string(),
		description: None,
		effect,
		priority: 0,
		valid_from: None,
		valid_until: None,
		actions: actions.iter().map(|a| a.to_string()).collect(),
		resource_types: vec![],
		condition: ConditionNode::parse(&condition).expect("valid condition"),
		business_vertical_id: None,
	}
}

pub fn assert_stage(decision: &Decision, allowed: bool, stage: DecisionStage) {
	assert_eq!(
		(decision.allowed, decision.stage),
		(allowed, stage),
		"unexpected decision: {decision:?}"
	);
}

/// Polls the evaluation table until `expected` rows exist for the policy.
pub async fn wait_for_evaluations(
	app: &TestApp,
	policy_id: &PolicyId,
	expected: usize,
) -> Vec<PolicyEvaluation> {
	for _ in 0..100 {
		let rows = app
			.services
			.engine
			.evaluation_history(policy_id, 100)
			.await
			.unwrap();
		if rows.len() >= expected {
			return rows;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("timed out waiting for {expected} evaluation rows for {policy_id}");
}
