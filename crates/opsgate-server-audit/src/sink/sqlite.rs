// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use opsgate_server_db::{DbError, EvaluationRepository};
use sqlx::SqlitePool;

use crate::error::AuditSinkError;
use crate::event::AuditEvent;
use crate::sink::AuditSink;

/// Writes evaluation records to the `policy_evaluations` table.
pub struct SqliteAuditSink {
	pool: SqlitePool,
	evaluations: EvaluationRepository,
	name: String,
}

impl SqliteAuditSink {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			evaluations: EvaluationRepository::new(pool.clone()),
			pool,
			name: "sqlite".to_string(),
		}
	}
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
	fn name(&self) -> &str {
		&self.name
	}

	async fn publish(&self, event: Arc<AuditEvent>) -> Result<(), AuditSinkError> {
		self
			.evaluations
			.record_evaluation(&event.evaluation)
			.await
			.map_err(|e| match &e {
				DbError::Sqlx(inner) if is_transient_error(inner) => {
					AuditSinkError::Transient(format!("database error: {e}"))
				}
				_ => AuditSinkError::Permanent(format!("database error: {e}")),
			})
	}

	async fn health_check(&self) -> Result<(), AuditSinkError> {
		sqlx::query("SELECT 1")
			.execute(&self.pool)
			.await
			.map_err(|e| AuditSinkError::Transient(format!("health check failed: {e}")))?;
		Ok(())
	}
}

fn is_transient_error(e: &sqlx::Error) -> bool {
	match e {
		sqlx::Error::Io(_) => true,
		sqlx::Error::PoolTimedOut => true,
		sqlx::Error::PoolClosed => true,
		sqlx::Error::Database(db_err) => {
			let msg = db_err.message().to_lowercase();
			msg.contains("busy") || msg.contains("locked") || msg.contains("timeout")
		}
		_ => false,
	}
}
