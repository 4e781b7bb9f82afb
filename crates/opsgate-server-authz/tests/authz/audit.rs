// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation records written through the audit pipeline.
//!
//! Writes are fire-and-forget, so these tests poll for rows.

use std::time::Duration;

use opsgate_authz_core::{PolicyEffect, UserId};
use opsgate_server_authz::{AuthorizationRequest, EvaluationRequest};
use serde_json::json;

use super::support::{policy, wait_for_evaluations, TestApp};

#[tokio::test]
async fn every_match_is_recorded() {
	let app = TestApp::new().await;
	let allow = app
		.activate(policy(
			"projects",
			PolicyEffect::Allow,
			&["project:*"],
			json!({ "attribute": "resource.type", "operator": "equals", "value": "project" }),
		))
		.await;
	let deny = app
		.activate(policy(
			"no-deletes",
			PolicyEffect::Deny,
			&["project:delete"],
			json!({ "attribute": "action", "operator": "ends_with", "value": ":delete" }),
		))
		.await;

	let staff = app.fixtures.staff.id;
	app.authorize(AuthorizationRequest::new(staff, "project:read", "project").with_resource_id("p-9"))
		.await;
	app.authorize(AuthorizationRequest::new(staff, "project:delete", "project"))
		.await;

	let allows = wait_for_evaluations(&app, &allow.id, 2).await;
	assert_eq!(allows.len(), 2);
	assert!(allows.iter().all(|e| e.decision && e.effect == PolicyEffect::Allow));
	assert!(allows.iter().any(|e| e.resource_id.as_deref() == Some("p-9")));

	let denies = wait_for_evaluations(&app, &deny.id, 1).await;
	assert_eq!(denies.len(), 1);
	assert!(!denies[0].decision);
	assert_eq!(denies[0].subject_id, staff);
	assert_eq!(denies[0].context["action"], json!("project:delete"));
}

#[tokio::test]
async fn bypass_and_dry_runs_write_nothing() {
	let app = TestApp::new().await;
	let lockdown = app
		.activate(policy(
			"lockdown",
			PolicyEffect::Deny,
			&[],
			json!({ "attribute": "action", "operator": "matches", "value": ".*" }),
		))
		.await;

	let decision = app
		.authorize(AuthorizationRequest::new(
			app.fixtures.super_admin.id,
			"project:delete",
			"project",
		))
		.await;
	assert!(decision.allowed);

	let result = app
		.services
		.engine
		.test_policy(
			&lockdown.id,
			&EvaluationRequest::new(UserId::generate(), "project:delete", "project"),
		)
		.await
		.unwrap();
	assert!(result.matched);

	tokio::time::sleep(Duration::from_millis(50)).await;
	let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM policy_evaluations")
		.fetch_one(&app.pool)
		.await
		.unwrap();
	assert_eq!(count, 0);
}
