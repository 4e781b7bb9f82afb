// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Append-only store of policy evaluation records.

use async_trait::async_trait;
use opsgate_authz_core::{PolicyEvaluation, PolicyId};
use sqlx::{sqlite::SqlitePool, Row};

use crate::error::DbError;
use crate::row::{parse_enum, parse_id, parse_json, parse_timestamp};

#[async_trait]
pub trait EvaluationStore: Send + Sync {
	async fn record_evaluation(&self, evaluation: &PolicyEvaluation) -> Result<(), DbError>;
	async fn list_evaluations(
		&self,
		policy_id: &PolicyId,
		limit: i64,
	) -> Result<Vec<PolicyEvaluation>, DbError>;
	async fn count_evaluations(&self, policy_id: &PolicyId) -> Result<i64, DbError>;
}

#[derive(Clone)]
pub struct EvaluationRepository {
	pool: SqlitePool,
}

impl EvaluationRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, evaluation), fields(policy_id = %evaluation.policy_id, subject_id = %evaluation.subject_id))]
	pub async fn record_evaluation(&self, evaluation: &PolicyEvaluation) -> Result<(), DbError> {
		sqlx::query(
			r#"
			INSERT INTO policy_evaluations
				(id, policy_id, subject_id, action, resource_type, resource_id, effect, decision, context, duration_us, evaluated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(evaluation.id.to_string())
		.bind(evaluation.policy_id.to_string())
		.bind(evaluation.subject_id.to_string())
		.bind(&evaluation.action)
		.bind(&evaluation.resource_type)
		.bind(&evaluation.resource_id)
		.bind(evaluation.effect.as_str())
		.bind(evaluation.decision as i32)
		.bind(serde_json::to_string(&evaluation.context)?)
		.bind(evaluation.duration_us)
		.bind(evaluation.evaluated_at.to_rfc3339())
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Most recent evaluations of one policy.
	#[tracing::instrument(skip(self), fields(policy_id = %policy_id))]
	pub async fn list_evaluations(
		&self,
		policy_id: &PolicyId,
		limit: i64,
	) -> Result<Vec<PolicyEvaluation>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT id, policy_id, subject_id, action, resource_type, resource_id, effect,
				decision, context, duration_us, evaluated_at
			FROM policy_evaluations
			WHERE policy_id = ?
			ORDER BY evaluated_at DESC, rowid DESC
			LIMIT ?
			"#,
		)
		.bind(policy_id.to_string())
		.bind(limit)
		.fetch_all(&self.pool)
		.await?;

		rows
			.iter()
			.map(|row| {
				let id: String = row.get("id");
				let policy_id: String = row.get("policy_id");
				let subject_id: String = row.get("subject_id");
				let effect: String = row.get("effect");
				let decision: i32 = row.get("decision");
				let context: String = row.get("context");
				let evaluated_at: String = row.get("evaluated_at");
				Ok(PolicyEvaluation {
					id: parse_id(&id, "evaluation id")?,
					policy_id: parse_id(&policy_id, "policy id")?,
					subject_id: parse_id(&subject_id, "subject id")?,
					action: row.get("action"),
					resource_type: row.get("resource_type"),
					resource_id: row.get("resource_id"),
					effect: parse_enum(&effect)?,
					decision: decision != 0,
					context: parse_json(&context)?,
					duration_us: row.get("duration_us"),
					evaluated_at: parse_timestamp(&evaluated_at, "evaluated_at")?,
				})
			})
			.collect()
	}

	#[tracing::instrument(skip(self), fields(policy_id = %policy_id))]
	pub async fn count_evaluations(&self, policy_id: &PolicyId) -> Result<i64, DbError> {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM policy_evaluations WHERE policy_id = ?")
			.bind(policy_id.to_string())
			.fetch_one(&self.pool)
			.await?;
		Ok(count)
	}
}

#[async_trait]
impl EvaluationStore for EvaluationRepository {
	async fn record_evaluation(&self, evaluation: &PolicyEvaluation) -> Result<(), DbError> {
		self.record_evaluation(evaluation).await
	}

	async fn list_evaluations(
		&self,
		policy_id: &PolicyId,
		limit: i64,
	) -> Result<Vec<PolicyEvaluation>, DbError> {
		self.list_evaluations(policy_id, limit).await
	}

	async fn count_evaluations(&self, policy_id: &PolicyId) -> Result<i64, DbError> {
		self.count_evaluations(policy_id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;
	use chrono::{Duration, Utc};
	use opsgate_authz_core::{PolicyEffect, UserId};
	use serde_json::json;

	fn evaluation(policy_id: PolicyId, offset_secs: i64) -> PolicyEvaluation {
		PolicyEvaluation {
			id: uuid::Uuid::new_v4(),
			policy_id,
			subject_id: UserId::generate(),
			action: "project:update".to_string(),
			resource_type: "project".to_string(),
			resource_id: Some("p-1".to_string()),
			effect: PolicyEffect::Deny,
			decision: false,
			context: json!({ "user.department": "ops" }),
			duration_us: 42,
			evaluated_at: Utc::now() + Duration::seconds(offset_secs),
		}
	}

	#[tokio::test]
	async fn records_and_lists_newest_first() {
		let repo = EvaluationRepository::new(create_test_pool().await);
		let policy_id = PolicyId::generate();
		let first = evaluation(policy_id, 0);
		let second = evaluation(policy_id, 5);
		repo.record_evaluation(&first).await.unwrap();
		repo.record_evaluation(&second).await.unwrap();
		repo.record_evaluation(&evaluation(PolicyId::generate(), 0)).await.unwrap();

		let listed = repo.list_evaluations(&policy_id, 10).await.unwrap();
		assert_eq!(listed, vec![second, first]);
		assert_eq!(repo.count_evaluations(&policy_id).await.unwrap(), 2);
		assert_eq!(repo.list_evaluations(&policy_id, 1).await.unwrap().len(), 1);
	}
}
