// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Attribute store service: definitions and time-bounded assignments.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opsgate_authz_core::{
	Attribute, AttributeAssignment, AttributeDataType, AttributeScope, AttributeSubject, UserId,
};
use opsgate_server_db::AttributeStore;
use serde_json::Value;

use crate::error::{AuthzError, Result};

#[derive(Clone)]
pub struct AttributeService {
	store: Arc<dyn AttributeStore>,
}

impl AttributeService {
	pub fn new(store: Arc<dyn AttributeStore>) -> Self {
		Self { store }
	}

	#[tracing::instrument(skip(self, description))]
	pub async fn define_attribute(
		&self,
		name: &str,
		scope: AttributeScope,
		data_type: AttributeDataType,
		description: Option<&str>,
	) -> Result<Attribute> {
		let name = name.trim();
		if name.is_empty() {
			return Err(AuthzError::InvalidInput(
				"attribute name must not be empty".to_string(),
			));
		}
		Ok(self
			.store
			.create_attribute(name, scope, data_type, description)
			.await?)
	}

	/// Hides the definition and, with it, every assignment of it.
	#[tracing::instrument(skip(self))]
	pub async fn deactivate_attribute(&self, name: &str) -> Result<()> {
		if !self.store.deactivate_attribute(name).await? {
			return Err(AuthzError::NotFound(format!("attribute {name}")));
		}
		Ok(())
	}

	pub async fn list_attributes(&self, scope: Option<AttributeScope>) -> Result<Vec<Attribute>> {
		Ok(self.store.list_attributes(scope).await?)
	}

	/// The active definition named `name` for the subject's scope.
	async fn active_attribute(&self, subject: &AttributeSubject, name: &str) -> Result<Attribute> {
		self
			.store
			.get_attribute_by_name(name)
			.await?
			.filter(|a| a.active && a.scope == subject.scope())
			.ok_or_else(|| {
				AuthzError::NotFound(format!("{} attribute {name}", subject.scope()))
			})
	}

	/// Replaces the subject's active value for `name`.
	///
	/// # Errors
	/// - `AuthzError::InvalidInput` if `valid_until` is not in the future
	/// - `AuthzError::NotFound` if no active attribute of the subject's scope has that name
	/// - `AuthzError::Conflict` if a concurrent assignment won
	#[tracing::instrument(skip(self, value), fields(subject = %subject))]
	pub async fn assign(
		&self,
		subject: &AttributeSubject,
		name: &str,
		value: &str,
		valid_until: Option<DateTime<Utc>>,
		assigned_by: Option<&UserId>,
	) -> Result<AttributeAssignment> {
		if valid_until.is_some_and(|until| until <= Utc::now()) {
			return Err(AuthzError::InvalidInput(
				"valid_until must be in the future".to_string(),
			));
		}
		let attribute = self.active_attribute(subject, name).await?;
		Ok(self
			.store
			.assign(subject, &attribute, value, valid_until, assigned_by)
			.await?)
	}

	#[tracing::instrument(skip(self), fields(subject = %subject))]
	pub async fn remove(&self, subject: &AttributeSubject, name: &str) -> Result<()> {
		let attribute = self.active_attribute(subject, name).await?;
		if !self.store.deactivate_assignment(subject, &attribute.id).await? {
			return Err(AuthzError::NotFound(format!(
				"no active value of {name} for {subject}"
			)));
		}
		Ok(())
	}

	/// Effective attribute values at `now`, keyed by attribute name.
	///
	/// Rows still flagged active but outside their validity window are skipped.
	#[tracing::instrument(skip(self), fields(subject = %subject))]
	pub async fn get_all(
		&self,
		subject: &AttributeSubject,
		now: DateTime<Utc>,
	) -> Result<BTreeMap<String, Value>> {
		let assignments = self.store.list_active_assignments(subject).await?;
		Ok(assignments
			.iter()
			.filter(|a| a.is_effective_at(now))
			.map(|a| (a.attribute_name.clone(), a.typed_value()))
			.collect())
	}

	pub async fn history(
		&self,
		subject: &AttributeSubject,
		name: &str,
	) -> Result<Vec<AttributeAssignment>> {
		let attribute = self
			.store
			.get_attribute_by_name(name)
			.await?
			.ok_or_else(|| AuthzError::NotFound(format!("attribute {name}")))?;
		Ok(self.store.history(subject, &attribute.id).await?)
	}

	pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64> {
		let expired = self.store.expire_stale(now).await?;
		if expired > 0 {
			tracing::debug!(expired, "expired stale attribute assignments");
		}
		Ok(expired)
	}
}
