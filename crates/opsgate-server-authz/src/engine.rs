// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! ABAC policy engine and policy administration.
//!
//! [`PolicyEngine::evaluate`] loads active policies, builds the attribute
//! context for the request and combines every match with deny-overrides-allow.
//! A policy whose condition cannot be evaluated is a non-match; the error is
//! reported in [`PolicyDecision::errors`] and evaluation carries on.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use opsgate_authz_core::{
	build_context, evaluation_order, AttributeContext, AttributeSubject, BusinessVerticalId,
	ConditionError, ConditionNode, ContextInputs, DecisionBuilder, NewPolicy, Policy, PolicyChanges, PolicyDecision, PolicyEffect,
	PolicyEvaluation, PolicyFilter, PolicyId, UserId,
};
use opsgate_server_audit::{AuditEvent, AuditService};
use opsgate_server_db::{EvaluationStore, PolicyStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::attributes::AttributeService;
use crate::error::{AuthzError, Result};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 500;

/// One request to evaluate against the active policy set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
	pub subject_id: UserId,
	pub action: String,
	pub resource_type: String,
	#[serde(default)]
	pub resource_id: Option<String>,
	#[serde(default)]
	pub environment: BTreeMap<String, Value>,
	#[serde(default)]
	pub business_vertical: Option<BusinessVerticalId>,
}

impl EvaluationRequest {
	pub fn new(subject_id: UserId, action: impl Into<String>, resource_type: impl Into<String>) -> Self {
		Self {
			subject_id,
			action: action.into(),
			resource_type: resource_type.into(),
			resource_id: None,
			environment: BTreeMap::new(),
			business_vertical: None,
		}
	}

	pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
		self.resource_id = Some(resource_id.into());
		self
	}

	pub fn with_environment(mut self, key: impl Into<String>, value: Value) -> Self {
		self.environment.insert(key.into(), value);
		self
	}

	pub fn in_vertical(mut self, vertical: BusinessVerticalId) -> Self {
		self.business_vertical = Some(vertical);
		self
	}
}

/// Dry-run result for a single policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyTestResult {
	pub policy_id: PolicyId,
	/// Whether the action and resource-type targets admit the request.
	pub applies: bool,
	pub matched: bool,
	pub effect: PolicyEffect,
	pub context: AttributeContext,
	pub error: Option<String>,
}

/// A parsed condition tree and the stored JSON it came from.
#[derive(Clone)]
struct CachedCondition {
	source: Value,
	parsed: std::result::Result<Arc<ConditionNode>, ConditionError>,
}

#[derive(Clone)]
pub struct PolicyEngine {
	policies: Arc<dyn PolicyStore>,
	attributes: AttributeService,
	evaluations: Arc<dyn EvaluationStore>,
	audit: Option<Arc<AuditService>>,
	conditions: Arc<RwLock<HashMap<PolicyId, CachedCondition>>>,
}

impl PolicyEngine {
	pub fn new(
		policies: Arc<dyn PolicyStore>,
		attributes: AttributeService,
		evaluations: Arc<dyn EvaluationStore>,
	) -> Self {
		Self {
			policies,
			attributes,
			evaluations,
			audit: None,
			conditions: Arc::new(RwLock::new(HashMap::new())),
		}
	}

	pub fn with_audit(mut self, audit: Arc<AuditService>) -> Self {
		self.audit = Some(audit);
		self
	}

	pub fn attributes(&self) -> &AttributeService {
		&self.attributes
	}

	// =========================================================================
	// Evaluation
	// =========================================================================

	/// Evaluates the request against every active, in-window, in-scope policy.
	///
	/// With no matching policy the decision is deny.
	#[tracing::instrument(
		skip(self, request),
		fields(subject_id = %request.subject_id, action = %request.action, resource_type = %request.resource_type)
	)]
	pub async fn evaluate(&self, request: &EvaluationRequest) -> Result<PolicyDecision> {
		let now = Utc::now();

		let mut candidates: Vec<Policy> = self
			.policies
			.list_active_policies()
			.await?
			.into_iter()
			.filter(|p| p.is_effective_at(now) && p.in_scope(request.business_vertical))
			.collect();
		candidates.sort_by(evaluation_order);

		let context = self.build_context(request, now).await?;

		let mut builder = DecisionBuilder::new();
		for policy in candidates
			.iter()
			.filter(|p| p.applies_to(&request.action, &request.resource_type))
		{
			builder.evaluated();
			let started = Instant::now();
			match self.evaluate_condition(policy, &context).await {
				Ok(true) => {
					builder.matched(policy.id, policy.effect);
					self.record_match(policy, request, &context, started, now);
				}
				Ok(false) => {}
				Err(e) => {
					tracing::warn!(policy_id = %policy.id, error = %e, "policy evaluation failed");
					builder.error(policy.id, e.to_string());
				}
			}
		}

		let decision = builder.finish(context);
		tracing::debug!(
			allowed = decision.allowed,
			matched = decision.matched_policies.len(),
			evaluated = decision.policies_evaluated,
			"policy decision"
		);
		Ok(decision)
	}

	/// Dry run of one policy regardless of its status or validity window.
	///
	/// Nothing is written to the audit trail.
	#[tracing::instrument(skip(self, request), fields(policy_id = %policy_id))]
	pub async fn test_policy(
		&self,
		policy_id: &PolicyId,
		request: &EvaluationRequest,
	) -> Result<PolicyTestResult> {
		let policy = self.get_policy(policy_id).await?;
		let context = self.build_context(request, Utc::now()).await?;
		let applies = policy.applies_to(&request.action, &request.resource_type);

		let (matched, error) = if applies {
			match self.evaluate_condition(&policy, &context).await {
				Ok(matched) => (matched, None),
				Err(e) => (false, Some(e.to_string())),
			}
		} else {
			(false, None)
		};

		Ok(PolicyTestResult {
			policy_id: policy.id,
			applies,
			matched,
			effect: policy.effect,
			context,
			error,
		})
	}

	/// Returns the parsed tree for `policy`, parsing only when its stored
	/// condition differs from the cached one.
	async fn condition_for(
		&self,
		policy: &Policy,
	) -> std::result::Result<Arc<ConditionNode>, ConditionError> {
		if let Some(cached) = self.conditions.read().await.get(&policy.id) {
			if cached.source == policy.condition {
				return cached.parsed.clone();
			}
		}

		let parsed = policy.parse_condition().map(Arc::new);
		self.conditions.write().await.insert(
			policy.id,
			CachedCondition {
				source: policy.condition.clone(),
				parsed: parsed.clone(),
			},
		);
		parsed
	}

	async fn evaluate_condition(&self, policy: &Policy, context: &AttributeContext) -> Result<bool> {
		let condition = self
			.condition_for(policy)
			.await
			.map_err(|e| AuthzError::Evaluation(e.to_string()))?;
		condition
			.evaluate(context)
			.map_err(|e| AuthzError::Evaluation(e.to_string()))
	}

	async fn build_context(
		&self,
		request: &EvaluationRequest,
		now: DateTime<Utc>,
	) -> Result<AttributeContext> {
		let user_attributes = self
			.attributes
			.get_all(&AttributeSubject::User(request.subject_id), now)
			.await?;
		let resource_attributes = match &request.resource_id {
			Some(id) => {
				self
					.attributes
					.get_all(&AttributeSubject::resource(&request.resource_type, id), now)
					.await?
			}
			None => BTreeMap::new(),
		};

		Ok(build_context(&ContextInputs {
			environment: &request.environment,
			user_attributes: &user_attributes,
			resource_attributes: &resource_attributes,
			user_id: request.subject_id,
			action: &request.action,
			resource_type: &request.resource_type,
			resource_id: request.resource_id.as_deref(),
			now,
		}))
	}

	fn record_match(
		&self,
		policy: &Policy,
		request: &EvaluationRequest,
		context: &AttributeContext,
		started: Instant,
		now: DateTime<Utc>,
	) {
		let Some(audit) = &self.audit else {
			return;
		};
		let evaluation = PolicyEvaluation {
			id: uuid::Uuid::new_v4(),
			policy_id: policy.id,
			subject_id: request.subject_id,
			action: request.action.clone(),
			resource_type: request.resource_type.clone(),
			resource_id: request.resource_id.clone(),
			effect: policy.effect,
			decision: policy.effect == PolicyEffect::Allow,
			context: context.to_json(),
			duration_us: i64::try_from(started.elapsed().as_micros()).unwrap_or(i64::MAX),
			evaluated_at: now,
		};
		audit.log(AuditEvent::policy_evaluation(evaluation));
	}

	#[tracing::instrument(skip(self), fields(policy_id = %policy_id))]
	pub async fn evaluation_history(
		&self,
		policy_id: &PolicyId,
		limit: i64,
	) -> Result<Vec<PolicyEvaluation>> {
		Ok(self
			.evaluations
			.list_evaluations(policy_id, clamp_limit(limit))
			.await?)
	}

	// =========================================================================
	// Administration
	// =========================================================================

	/// Stores a new policy as `draft`. Activation goes through approval.
	#[tracing::instrument(skip(self, input), fields(name = %input.name))]
	pub async fn create_policy(&self, input: NewPolicy, created_by: Option<UserId>) -> Result<Policy> {
		input.validate()?;
		let policy = input.into_policy(created_by, Utc::now());
		self.policies.create_policy(&policy).await?;
		tracing::debug!(policy_id = %policy.id, "policy created");
		Ok(policy)
	}

	pub async fn get_policy(&self, id: &PolicyId) -> Result<Policy> {
		self
			.policies
			.get_policy(id)
			.await?
			.ok_or_else(|| AuthzError::NotFound(format!("policy {id}")))
	}

	pub async fn list_policies(
		&self,
		filter: &PolicyFilter,
		limit: i64,
		offset: i64,
	) -> Result<Vec<Policy>> {
		Ok(self
			.policies
			.list_policies(filter, clamp_limit(limit), offset.max(0))
			.await?)
	}

	/// Applies field changes, snapshots a version and logs the diff.
	///
	/// # Errors
	/// - `AuthzError::InvalidInput` if the changes touch `status` or fail validation
	/// - `AuthzError::NotFound` if the policy does not exist
	#[tracing::instrument(skip(self, changes, reason), fields(policy_id = %id))]
	pub async fn update_policy(
		&self,
		id: &PolicyId,
		changes: &PolicyChanges,
		actor: Option<&UserId>,
		reason: Option<&str>,
	) -> Result<Policy> {
		if changes.status.is_some() {
			return Err(AuthzError::InvalidInput(
				"status changes require an approval request".to_string(),
			));
		}
		changes.validate()?;

		let mut policy = self.get_policy(id).await?;
		let diff = changes.apply(&mut policy, Utc::now())?;
		if diff.as_object().is_some_and(|d| d.is_empty()) {
			tracing::debug!("policy unchanged");
			return Ok(policy);
		}

		self.policies.update_policy(&policy, &diff, actor, reason).await?;
		Ok(policy)
	}

	#[tracing::instrument(skip(self, reason), fields(policy_id = %id))]
	pub async fn delete_policy(
		&self,
		id: &PolicyId,
		actor: Option<&UserId>,
		reason: Option<&str>,
	) -> Result<()> {
		if !self.policies.delete_policy(id, actor, reason).await? {
			return Err(AuthzError::NotFound(format!("policy {id}")));
		}
		self.conditions.write().await.remove(id);
		Ok(())
	}
}

fn clamp_limit(limit: i64) -> i64 {
	if limit <= 0 {
		DEFAULT_LIST_LIMIT
	} else {
		limit.min(MAX_LIST_LIMIT)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use opsgate_authz_core::{
		AttributeDataType, AttributeScope, ConditionNode, Operator, PolicyStatus,
		NO_MATCHING_POLICIES,
	};
	use opsgate_server_db::testing::create_test_pool;
	use opsgate_server_db::{AttributeRepository, EvaluationRepository, PolicyRepository};
	use serde_json::json;

	struct Fixture {
		engine: PolicyEngine,
		policies: Arc<PolicyRepository>,
	}

	async fn fixture() -> Fixture {
		let pool = create_test_pool().await;
		let policies = Arc::new(PolicyRepository::new(pool.clone()));
		let attributes = AttributeService::new(Arc::new(AttributeRepository::new(pool.clone())));
		let engine = PolicyEngine::new(
			policies.clone(),
			attributes,
			Arc::new(EvaluationRepository::new(pool)),
		);
		Fixture { engine, policies }
	}

	fn new_policy(name: &str, effect: PolicyEffect, condition: ConditionNode) -> NewPolicy {
		NewPolicy {
			name: name.to_string(),
			description: None,
			effect,
			priority: 0,
			valid_from: None,
			valid_until: None,
			actions: vec!["project:*".to_string()],
			resource_types: vec!["project".to_string()],
			condition,
			business_vertical_id: None,
		}
	}

	/// Inserts an already-active policy straight into the store.
	async fn active(f: &Fixture, input: NewPolicy) -> Policy {
		let mut policy = input.into_policy(None, Utc::now());
		policy.status = PolicyStatus::Active;
		f.policies.create_policy(&policy).await.unwrap();
		policy
	}

	fn department_is(value: &str) -> ConditionNode {
		ConditionNode::leaf("user.department", Operator::Equals, json!(value))
	}

	async fn with_department(f: &Fixture, value: &str) -> UserId {
		let attributes = f.engine.attributes();
		if attributes.list_attributes(None).await.unwrap().is_empty() {
			attributes
				.define_attribute("department", AttributeScope::User, AttributeDataType::String, None)
				.await
				.unwrap();
		}
		let user = UserId::generate();
		attributes
			.assign(&AttributeSubject::User(user), "department", value, None, None)
			.await
			.unwrap();
		user
	}

	#[tokio::test]
	async fn deny_overrides_allow() {
		let f = fixture().await;
		let allow = active(&f, new_policy("ops-allow", PolicyEffect::Allow, department_is("ops"))).await;
		let mut deny_input = new_policy("ops-deny", PolicyEffect::Deny, department_is("ops"));
		deny_input.priority = -10;
		let deny = active(&f, deny_input).await;
		let user = with_department(&f, "ops").await;

		let decision = f
			.engine
			.evaluate(&EvaluationRequest::new(user, "project:update", "project"))
			.await
			.unwrap();

		assert!(!decision.allowed);
		assert_eq!(decision.effect, PolicyEffect::Deny);
		assert_eq!(decision.matched_policies, vec![allow.id, deny.id]);
		assert_eq!(decision.deny_policies, vec![deny.id]);
		assert_eq!(decision.allow_policies, vec![allow.id]);
	}

	#[tokio::test]
	async fn no_match_is_deny() {
		let f = fixture().await;
		active(&f, new_policy("ops-allow", PolicyEffect::Allow, department_is("ops"))).await;
		let user = with_department(&f, "finance").await;

		let decision = f
			.engine
			.evaluate(&EvaluationRequest::new(user, "project:update", "project"))
			.await
			.unwrap();

		assert!(!decision.allowed);
		assert_eq!(decision.reason, NO_MATCHING_POLICIES);
		assert!(decision.matched_policies.is_empty());
		assert_eq!(decision.policies_evaluated, 1);
	}

	#[tokio::test]
	async fn only_allows_permit() {
		let f = fixture().await;
		let allow = active(&f, new_policy("ops-allow", PolicyEffect::Allow, department_is("ops"))).await;
		active(&f, new_policy("hr-deny", PolicyEffect::Deny, department_is("hr"))).await;
		let user = with_department(&f, "ops").await;

		let decision = f
			.engine
			.evaluate(&EvaluationRequest::new(user, "project:update", "project"))
			.await
			.unwrap();

		assert!(decision.allowed);
		assert_eq!(decision.effect, PolicyEffect::Allow);
		assert_eq!(decision.matched_policies, vec![allow.id]);
		assert_eq!(decision.context.get("user.department"), Some(&json!("ops")));
	}

	#[tokio::test]
	async fn targets_drafts_and_scope_filter_candidates() {
		let f = fixture().await;
		let always = ConditionNode::leaf("action", Operator::StartsWith, json!("project:"));

		let mut other_target = new_policy("planning-only", PolicyEffect::Allow, always.clone());
		other_target.actions = vec!["planning:*".to_string()];
		active(&f, other_target).await;

		f.engine
			.create_policy(new_policy("draft", PolicyEffect::Allow, always.clone()), None)
			.await
			.unwrap();

		let vertical = BusinessVerticalId::generate();
		let mut scoped = new_policy("scoped", PolicyEffect::Allow, always.clone());
		scoped.business_vertical_id = Some(vertical);
		let scoped = active(&f, scoped).await;

		let user = UserId::generate();
		let request = EvaluationRequest::new(user, "project:update", "project");

		let elsewhere = f
			.engine
			.evaluate(&request.clone().in_vertical(BusinessVerticalId::generate()))
			.await
			.unwrap();
		assert!(!elsewhere.allowed);
		assert_eq!(elsewhere.policies_evaluated, 0);

		let inside = f.engine.evaluate(&request.in_vertical(vertical)).await.unwrap();
		assert_eq!(inside.matched_policies, vec![scoped.id]);
	}

	#[tokio::test]
	async fn broken_condition_is_reported_and_skipped() {
		let f = fixture().await;
		let allow = active(
			&f,
			new_policy(
				"always",
				PolicyEffect::Allow,
				ConditionNode::leaf("resource.type", Operator::Equals, json!("project")),
			),
		)
		.await;
		let broken = active(
			&f,
			new_policy(
				"bad-regex",
				PolicyEffect::Deny,
				ConditionNode::leaf("action", Operator::Matches, json!("(unclosed")),
			),
		)
		.await;

		let decision = f
			.engine
			.evaluate(&EvaluationRequest::new(UserId::generate(), "project:read", "project"))
			.await
			.unwrap();

		assert!(decision.allowed);
		assert_eq!(decision.matched_policies, vec![allow.id]);
		assert_eq!(decision.errors.len(), 1);
		assert_eq!(decision.errors[0].policy_id, broken.id);
	}

	#[tokio::test]
	async fn parsed_conditions_are_reused_until_changed() {
		let f = fixture().await;
		let policy = f
			.engine
			.create_policy(new_policy("ops", PolicyEffect::Allow, department_is("ops")), None)
			.await
			.unwrap();
		let user = with_department(&f, "ops").await;
		let request = EvaluationRequest::new(user, "project:read", "project");

		let cached = |engine: &PolicyEngine| {
			let conditions = engine.conditions.clone();
			let id = policy.id;
			async move {
				conditions
					.read()
					.await
					.get(&id)
					.and_then(|c| c.parsed.clone().ok())
					.unwrap()
			}
		};

		assert!(f.engine.test_policy(&policy.id, &request).await.unwrap().matched);
		let first = cached(&f.engine).await;
		assert!(f.engine.test_policy(&policy.id, &request).await.unwrap().matched);
		assert!(Arc::ptr_eq(&first, &cached(&f.engine).await));

		let retarget = PolicyChanges {
			condition: Some(department_is("finance")),
			..Default::default()
		};
		f.engine
			.update_policy(&policy.id, &retarget, None, None)
			.await
			.unwrap();
		assert!(!f.engine.test_policy(&policy.id, &request).await.unwrap().matched);
		assert!(!Arc::ptr_eq(&first, &cached(&f.engine).await));

		f.engine.delete_policy(&policy.id, None, None).await.unwrap();
		assert!(f.engine.conditions.read().await.is_empty());
	}

	#[tokio::test]
	async fn caller_environment_is_namespaced() {
		let f = fixture().await;
		let user = UserId::generate();
		active(
			&f,
			new_policy(
				"self-only",
				PolicyEffect::Allow,
				ConditionNode::leaf("user.id", Operator::Equals, json!("{{resource.owner}}")),
			),
		)
		.await;

		let request = EvaluationRequest::new(UserId::generate(), "project:read", "project")
			.with_environment("user.id", json!(user.to_string()))
			.with_environment("resource.owner", json!(user.to_string()));
		let decision = f.engine.evaluate(&request).await.unwrap();
		assert!(!decision.allowed);
	}

	#[tokio::test]
	async fn test_policy_ignores_status() {
		let f = fixture().await;
		let draft = f
			.engine
			.create_policy(new_policy("draft", PolicyEffect::Deny, department_is("ops")), None)
			.await
			.unwrap();
		assert_eq!(draft.status, PolicyStatus::Draft);
		let user = with_department(&f, "ops").await;

		let result = f
			.engine
			.test_policy(&draft.id, &EvaluationRequest::new(user, "project:delete", "project"))
			.await
			.unwrap();
		assert!(result.applies);
		assert!(result.matched);
		assert_eq!(result.effect, PolicyEffect::Deny);
		assert!(result.error.is_none());

		let miss = f
			.engine
			.test_policy(&draft.id, &EvaluationRequest::new(user, "site:delete", "site"))
			.await
			.unwrap();
		assert!(!miss.applies);
		assert!(!miss.matched);

		let err = f
			.engine
			.test_policy(&PolicyId::generate(), &EvaluationRequest::new(user, "a:b", "a"))
			.await
			.unwrap_err();
		assert!(matches!(err, AuthzError::NotFound(_)));
	}

	#[tokio::test]
	async fn update_rejects_status_and_logs_diff() {
		let f = fixture().await;
		let policy = f
			.engine
			.create_policy(new_policy("p", PolicyEffect::Allow, department_is("ops")), None)
			.await
			.unwrap();

		let activate = PolicyChanges {
			status: Some(PolicyStatus::Active),
			..Default::default()
		};
		let err = f
			.engine
			.update_policy(&policy.id, &activate, None, None)
			.await
			.unwrap_err();
		assert!(matches!(err, AuthzError::InvalidInput(_)));

		let bump = PolicyChanges {
			priority: Some(7),
			..Default::default()
		};
		let updated = f
			.engine
			.update_policy(&policy.id, &bump, None, Some("raise"))
			.await
			.unwrap();
		assert_eq!(updated.priority, 7);

		// Same value again: nothing to write.
		f.engine.update_policy(&policy.id, &bump, None, None).await.unwrap();

		let versions = f.policies.list_versions(&policy.id).await.unwrap();
		assert_eq!(versions.len(), 2);
		let log = f.policies.change_log(&policy.id).await.unwrap();
		assert_eq!(log.last().unwrap().diff, json!({ "priority": { "from": 0, "to": 7 } }));
	}

	#[tokio::test]
	async fn create_rejects_invalid_input() {
		let f = fixture().await;
		let mut input = new_policy("  ", PolicyEffect::Allow, department_is("ops"));
		let err = f.engine.create_policy(input.clone(), None).await.unwrap_err();
		assert!(matches!(err, AuthzError::InvalidInput(_)));

		input.name = "dup".to_string();
		f.engine.create_policy(input.clone(), None).await.unwrap();
		let err = f.engine.create_policy(input, None).await.unwrap_err();
		assert!(matches!(err, AuthzError::Conflict(_)));
	}

	#[tokio::test]
	async fn delete_missing_policy_is_not_found() {
		let f = fixture().await;
		let err = f
			.engine
			.delete_policy(&PolicyId::generate(), None, None)
			.await
			.unwrap_err();
		assert!(matches!(err, AuthzError::NotFound(_)));
	}

	#[test]
	fn list_limit_is_clamped() {
		assert_eq!(clamp_limit(0), DEFAULT_LIST_LIMIT);
		assert_eq!(clamp_limit(-3), DEFAULT_LIST_LIMIT);
		assert_eq!(clamp_limit(10), 10);
		assert_eq!(clamp_limit(10_000), MAX_LIST_LIMIT);
	}

	proptest::proptest! {
		#[test]
		fn clamped_limit_is_always_usable(limit in proptest::prelude::any::<i64>()) {
			let clamped = clamp_limit(limit);
			proptest::prop_assert!((1..=MAX_LIST_LIMIT).contains(&clamped));
		}
	}
}
