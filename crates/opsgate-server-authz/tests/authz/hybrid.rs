// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end decisions through the hybrid authorizer.
//!
//! Key invariant: super-admins bypass RBAC and ABAC; everyone else needs the
//! action as a permission before policies are consulted.

use opsgate_authz_core::{PolicyEffect, UserId};
use opsgate_server_authz::{AuthorizationRequest, AuthzError, DecisionStage, Principal};
use opsgate_server_config::ServerConfig;
use serde_json::json;

use super::support::{assert_stage, policy, TestApp};

fn deny_everything() -> serde_json::Value {
	json!({ "attribute": "action", "operator": "matches", "value": ".*" })
}

#[tokio::test]
async fn super_admin_is_allowed_without_abac() {
	let app = TestApp::new().await;
	app.activate(policy("lockdown", PolicyEffect::Deny, &[], deny_everything()))
		.await;

	for user in [&app.fixtures.super_admin, &app.fixtures.root] {
		let decision = app
			.authorize(AuthorizationRequest::new(user.id, "project:delete", "project"))
			.await;
		assert_stage(&decision, true, DecisionStage::SuperAdmin);
		assert!(decision.matched_policies.is_empty());
	}
}

#[tokio::test]
async fn missing_permission_is_denied_before_policies() {
	let app = TestApp::new().await;
	app.activate(policy("allow-all", PolicyEffect::Allow, &[], deny_everything()))
		.await;

	let decision = app
		.authorize(AuthorizationRequest::new(
			app.fixtures.staff.id,
			"planning:update",
			"planning",
		))
		.await;

	assert_stage(&decision, false, DecisionStage::Rbac);
	assert_eq!(decision.reason, "missing permission planning:update");
	assert_eq!(decision.effect, PolicyEffect::Deny);
	assert!(decision.matched_policies.is_empty());
}

#[tokio::test]
async fn rbac_pass_defers_to_policies() {
	let app = TestApp::new().await;
	let request = AuthorizationRequest::new(app.fixtures.staff.id, "project:update", "project");

	let decision = app.authorize(request.clone()).await;
	assert_stage(&decision, false, DecisionStage::Abac);
	assert_eq!(decision.reason, "no matching policies");

	let allow = app
		.activate(policy(
			"staff-projects",
			PolicyEffect::Allow,
			&["project:*"],
			json!({ "attribute": "resource.type", "operator": "eq", "value": "project" }),
		))
		.await;
	let decision = app.authorize(request.clone()).await;
	assert_stage(&decision, true, DecisionStage::Abac);
	assert_eq!(decision.reason, "allowed by policy");
	assert_eq!(decision.matched_policies, vec![allow.id]);

	let deny = app
		.activate(policy(
			"friday-freeze",
			PolicyEffect::Deny,
			&["project:update"],
			json!({ "attribute": "environment.change_window", "operator": "=", "value": "closed" }),
		))
		.await;
	let frozen = request.with_environment("change_window", json!("closed"));
	let decision = app.authorize(frozen).await;
	assert_stage(&decision, false, DecisionStage::Abac);
	assert_eq!(decision.reason, "denied by policy");
	assert!(decision.matched_policies.contains(&deny.id));
	assert!(decision.matched_policies.contains(&allow.id));
}

#[tokio::test]
async fn business_permissions_need_the_vertical() {
	let app = TestApp::new().await;
	app.activate(policy(
		"site-edits",
		PolicyEffect::Allow,
		&["site:*"],
		json!({ "attribute": "resource.type", "operator": "equals", "value": "site" }),
	))
	.await;

	let base = AuthorizationRequest::new(app.fixtures.clerk.id, "site:update", "site");

	let decision = app.authorize(base.clone()).await;
	assert_stage(&decision, false, DecisionStage::Rbac);

	let by_id = app.fixtures.retail.id.to_string();
	for vertical in ["retail", "Retail Operations", by_id.as_str()] {
		let decision = app.authorize(base.clone().in_vertical(vertical)).await;
		assert_stage(&decision, true, DecisionStage::Abac);
	}

	let err = app
		.services
		.authorizer
		.authorize(&base.in_vertical("wholesale"))
		.await
		.unwrap_err();
	assert!(matches!(err, AuthzError::InvalidInput(_)));
}

#[tokio::test]
async fn vertical_scoped_policies_stay_in_their_vertical() {
	let app = TestApp::new().await;
	let other = app
		.rbac
		.create_vertical("FLEET", "Fleet", None)
		.await
		.unwrap();
	let mut scoped = policy(
		"fleet-only",
		PolicyEffect::Allow,
		&["site:*"],
		json!({ "attribute": "resource.type", "operator": "equals", "value": "site" }),
	);
	scoped.business_vertical_id = Some(other.id);
	app.activate(scoped).await;

	let decision = app
		.authorize(
			AuthorizationRequest::new(app.fixtures.clerk.id, "site:read", "site").in_vertical("retail"),
		)
		.await;
	assert_stage(&decision, false, DecisionStage::Abac);
	assert_eq!(decision.reason, "no matching policies");
}

#[tokio::test]
async fn identity_errors_are_unauthorized() {
	let app = TestApp::new().await;

	for subject in ["not-a-uuid".to_string(), UserId::generate().to_string()] {
		let err = app
			.services
			.authorizer
			.authorize(&AuthorizationRequest::new(
				Principal::new(subject),
				"project:read",
				"project",
			))
			.await
			.unwrap_err();
		assert!(matches!(err, AuthzError::Unauthorized(_)));
		assert_eq!(err.status_code(), 401);
	}
}

#[tokio::test]
async fn declared_role_is_trusted_only_when_configured() {
	let mut config = ServerConfig::default();
	config.authz.trust_declared_role = true;
	let app = TestApp::with_config(config).await;

	let stranger = Principal::new(UserId::generate().to_string()).with_role("super_admin");
	let decision = app
		.authorize(AuthorizationRequest::new(stranger, "project:delete", "project"))
		.await;
	assert_stage(&decision, true, DecisionStage::SuperAdmin);

	let near_miss = Principal::new(app.fixtures.staff.id.to_string()).with_role("SuperAdmin");
	let decision = app
		.authorize(AuthorizationRequest::new(near_miss, "planning:read", "planning"))
		.await;
	assert_stage(&decision, false, DecisionStage::Rbac);
}

#[tokio::test]
async fn user_attributes_drive_conditions() {
	let app = TestApp::new().await;
	let attributes = &app.services.attributes;
	attributes
		.define_attribute(
			"department",
			opsgate_authz_core::AttributeScope::User,
			opsgate_authz_core::AttributeDataType::String,
			None,
		)
		.await
		.unwrap();
	app.activate(policy(
		"ops-reports",
		PolicyEffect::Allow,
		&["report:read"],
		json!({ "and": [
			{ "attribute": "user.department", "operator": "in", "value": ["ops", "finance"] },
			{ "not": { "attribute": "environment.channel", "operator": "equals", "value": "public" } }
		] }),
	))
	.await;

	let subject = opsgate_authz_core::AttributeSubject::User(app.fixtures.staff.id);
	let request = AuthorizationRequest::new(app.fixtures.staff.id, "report:read", "report");

	assert!(!app.authorize(request.clone()).await.allowed);

	attributes
		.assign(&subject, "department", "ops", None, None)
		.await
		.unwrap();
	assert!(app.authorize(request.clone()).await.allowed);
	assert!(
		!app
			.authorize(request.with_environment("channel", json!("public")))
			.await
			.allowed
	);
}

#[tokio::test]
async fn business_role_without_the_permission_is_denied_in_its_vertical() {
	let app = TestApp::new().await;
	app.activate(policy("allow-all", PolicyEffect::Allow, &[], deny_everything()))
		.await;

	let decision = app
		.authorize(
			AuthorizationRequest::new(app.fixtures.clerk.id, "site:delete", "site").in_vertical("retail"),
		)
		.await;

	assert_stage(&decision, false, DecisionStage::Rbac);
	assert_eq!(decision.reason, "missing permission site:delete");
	assert_eq!(decision.effect, PolicyEffect::Deny);
	assert!(decision.matched_policies.is_empty());
}
