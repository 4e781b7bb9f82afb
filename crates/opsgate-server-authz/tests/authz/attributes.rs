// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resource attributes and time-bounded values in live decisions.

use chrono::{Duration, Utc};
use opsgate_authz_core::{AttributeDataType, AttributeScope, AttributeSubject, PolicyEffect};
use opsgate_server_authz::{AuthorizationRequest, EvaluationRequest};
use serde_json::json;

use super::support::{policy, TestApp};

#[tokio::test]
async fn resource_attributes_compare_against_user_attributes() {
	let app = TestApp::new().await;
	let attributes = &app.services.attributes;
	attributes
		.define_attribute("region", AttributeScope::User, AttributeDataType::String, None)
		.await
		.unwrap();
	attributes
		.define_attribute("site_region", AttributeScope::Resource, AttributeDataType::String, None)
		.await
		.unwrap();
	app.activate(policy(
		"same-region",
		PolicyEffect::Allow,
		&["site:*"],
		json!({ "attribute": "resource.site_region", "operator": "equals", "value": "{{user.region}}" }),
	))
	.await;

	let clerk = app.fixtures.clerk.id;
	attributes
		.assign(&AttributeSubject::User(clerk), "region", "eu-west", None, None)
		.await
		.unwrap();
	attributes
		.assign(&AttributeSubject::resource("site", "dublin"), "site_region", "eu-west", None, None)
		.await
		.unwrap();
	attributes
		.assign(&AttributeSubject::resource("site", "ohio"), "site_region", "us-east", None, None)
		.await
		.unwrap();

	let request = |site: &str| {
		AuthorizationRequest::new(clerk, "site:update", "site")
			.with_resource_id(site)
			.in_vertical("retail")
	};
	assert!(app.authorize(request("dublin")).await.allowed);
	assert!(!app.authorize(request("ohio")).await.allowed);
	assert!(!app.authorize(request("unknown")).await.allowed);
}

#[tokio::test]
async fn expired_values_stop_matching() {
	let app = TestApp::new().await;
	let attributes = &app.services.attributes;
	attributes
		.define_attribute("on_call", AttributeScope::User, AttributeDataType::Boolean, None)
		.await
		.unwrap();
	let on_call = app
		.activate(policy(
			"on-call-writes",
			PolicyEffect::Allow,
			&["project:*"],
			json!({ "attribute": "user.on_call", "operator": "equals", "value": true }),
		))
		.await;

	let staff = app.fixtures.staff.id;
	let until = Utc::now() + Duration::minutes(30);
	attributes
		.assign(&AttributeSubject::User(staff), "on_call", "true", Some(until), None)
		.await
		.unwrap();

	let decision = app
		.authorize(AuthorizationRequest::new(staff, "project:update", "project"))
		.await;
	assert!(decision.allowed);
	assert_eq!(decision.matched_policies, vec![on_call.id]);

	let later = until + Duration::seconds(1);
	let values = attributes
		.get_all(&AttributeSubject::User(staff), later)
		.await
		.unwrap();
	assert!(values.is_empty());

	// Still flagged active until housekeeping runs.
	assert!(
		attributes.history(&AttributeSubject::User(staff), "on_call").await.unwrap()[0].active
	);
	assert_eq!(attributes.expire_stale(later).await.unwrap(), 1);

	let result = app
		.services
		.engine
		.test_policy(&on_call.id, &EvaluationRequest::new(staff, "project:update", "project"))
		.await
		.unwrap();
	assert!(!result.matched);
}
