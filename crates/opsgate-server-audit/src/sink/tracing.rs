// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AuditSinkError;
use crate::event::AuditEvent;
use crate::sink::AuditSink;

/// Emits each event as an `info` tracing event on the `opsgate::audit` target.
pub struct TracingAuditSink {
	name: String,
}

impl TracingAuditSink {
	pub fn new() -> Self {
		Self {
			name: "tracing".to_string(),
		}
	}
}

impl Default for TracingAuditSink {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl AuditSink for TracingAuditSink {
	fn name(&self) -> &str {
		&self.name
	}

	async fn publish(&self, event: Arc<AuditEvent>) -> Result<(), AuditSinkError> {
		let evaluation = &event.evaluation;
		tracing::info!(
			target: "opsgate::audit",
			event_id = %event.id,
			event_type = %event.event_type,
			policy_id = %evaluation.policy_id,
			subject_id = %evaluation.subject_id,
			action = %evaluation.action,
			resource_type = %evaluation.resource_type,
			resource_id = evaluation.resource_id.as_deref(),
			effect = %evaluation.effect,
			decision = evaluation.decision,
			duration_us = evaluation.duration_us,
			"policy evaluation"
		);
		Ok(())
	}
}
