// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Approval lifecycle as seen by callers of the authorizer.

use opsgate_authz_core::{ApprovalRequestType, ApprovalStatus, PolicyEffect, PolicyStatus, UserId};
use opsgate_server_authz::{AuthorizationRequest, AuthzError, DecisionStage};
use serde_json::json;

use super::support::{assert_stage, policy, TestApp};

fn any_project() -> serde_json::Value {
	json!({ "attribute": "action", "operator": "starts_with", "value": "project:" })
}

#[tokio::test]
async fn draft_policy_takes_effect_only_after_quorum() {
	let app = TestApp::new().await;
	let approvals = &app.services.approvals;
	approvals
		.upsert_workflow("four-eyes", ApprovalRequestType::Activate, 2, 0, true)
		.await
		.unwrap();

	let draft = app
		.services
		.engine
		.create_policy(
			policy("projects", PolicyEffect::Allow, &["project:*"], any_project()),
			Some(app.fixtures.staff.id),
		)
		.await
		.unwrap();
	let request = AuthorizationRequest::new(app.fixtures.staff.id, "project:read", "project");
	assert!(!app.authorize(request.clone()).await.allowed);

	let pending = approvals
		.create_request(
			&draft.id,
			ApprovalRequestType::Activate,
			&app.fixtures.staff.id,
			Some("needed for launch".to_string()),
			None,
		)
		.await
		.unwrap();

	approvals
		.approve(&pending.id, &UserId::generate(), None)
		.await
		.unwrap();
	assert!(!app.authorize(request.clone()).await.allowed);

	let done = approvals
		.approve(&pending.id, &app.fixtures.root.id, None)
		.await
		.unwrap();
	assert_eq!(done.request.status, ApprovalStatus::Approved);

	let decision = app.authorize(request).await;
	assert_stage(&decision, true, DecisionStage::Abac);
	assert_eq!(decision.matched_policies, vec![draft.id]);
}

#[tokio::test]
async fn rejected_activation_leaves_policy_draft() {
	let app = TestApp::new().await;
	let approvals = &app.services.approvals;
	let draft = app
		.services
		.engine
		.create_policy(
			policy("projects", PolicyEffect::Allow, &["project:*"], any_project()),
			None,
		)
		.await
		.unwrap();

	let request = approvals
		.create_request(&draft.id, ApprovalRequestType::Activate, &app.fixtures.staff.id, None, None)
		.await
		.unwrap();
	approvals
		.reject(&request.id, &app.fixtures.root.id, Some("too broad"))
		.await
		.unwrap();

	let err = approvals
		.approve(&request.id, &UserId::generate(), None)
		.await
		.unwrap_err();
	assert!(matches!(err, AuthzError::Conflict(ref m) if m == "request already resolved"));
	assert_eq!(
		app.services.engine.get_policy(&draft.id).await.unwrap().status,
		PolicyStatus::Draft
	);
}

#[tokio::test]
async fn create_request_applies_changes_and_activates() {
	let app = TestApp::new().await;
	let approvals = &app.services.approvals;
	let draft = app
		.services
		.engine
		.create_policy(
			policy("projects", PolicyEffect::Allow, &["project:*"], any_project()),
			None,
		)
		.await
		.unwrap();

	let request = approvals
		.create_request(
			&draft.id,
			ApprovalRequestType::Create,
			&app.fixtures.staff.id,
			None,
			Some(json!({ "priority": 25, "description": "launch access" })),
		)
		.await
		.unwrap();
	approvals
		.approve(&request.id, &app.fixtures.root.id, None)
		.await
		.unwrap();

	let live = app.services.engine.get_policy(&draft.id).await.unwrap();
	assert_eq!(live.status, PolicyStatus::Active);
	assert_eq!(live.priority, 25);
	assert_eq!(live.description.as_deref(), Some("launch access"));

	let log = approvals.change_log(&draft.id).await.unwrap();
	let actions: Vec<&str> = log.iter().map(|entry| entry.action.as_str()).collect();
	assert_eq!(actions, vec!["create", "create"]);
}

#[tokio::test]
async fn deactivate_and_delete_through_approval() {
	let app = TestApp::new().await;
	let approvals = &app.services.approvals;
	let live = app
		.activate(policy("projects", PolicyEffect::Allow, &["project:*"], any_project()))
		.await;
	let request = AuthorizationRequest::new(app.fixtures.staff.id, "project:read", "project");
	assert!(app.authorize(request.clone()).await.allowed);

	let deactivate = approvals
		.create_request(&live.id, ApprovalRequestType::Deactivate, &app.fixtures.staff.id, None, None)
		.await
		.unwrap();
	approvals
		.approve(&deactivate.id, &app.fixtures.root.id, None)
		.await
		.unwrap();
	assert!(!app.authorize(request.clone()).await.allowed);

	let delete = approvals
		.create_request(&live.id, ApprovalRequestType::Delete, &app.fixtures.staff.id, None, None)
		.await
		.unwrap();
	approvals
		.approve(&delete.id, &app.fixtures.root.id, None)
		.await
		.unwrap();

	let err = app.services.engine.get_policy(&live.id).await.unwrap_err();
	assert!(matches!(err, AuthzError::NotFound(_)));

	let log = approvals.change_log(&live.id).await.unwrap();
	assert_eq!(log.last().unwrap().action, "delete");
	assert!(!approvals.list_versions(&live.id).await.unwrap().is_empty());
}
