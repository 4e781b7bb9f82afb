// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resource ownership lookups keyed by resource type.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use opsgate_authz_core::UserId;

use crate::error::Result;

/// Finds the owner of one kind of resource.
#[async_trait]
pub trait OwnerLookup: Send + Sync {
	async fn owner_of(&self, resource_id: &str) -> Result<Option<UserId>>;
}

/// Maps resource types to their owner lookups.
#[derive(Clone, Default)]
pub struct OwnershipRegistry {
	lookups: HashMap<String, Arc<dyn OwnerLookup>>,
}

impl OwnershipRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, resource_type: impl Into<String>, lookup: Arc<dyn OwnerLookup>) {
		self.lookups.insert(resource_type.into(), lookup);
	}

	pub fn with(mut self, resource_type: impl Into<String>, lookup: Arc<dyn OwnerLookup>) -> Self {
		self.register(resource_type, lookup);
		self
	}

	pub fn is_registered(&self, resource_type: &str) -> bool {
		self.lookups.contains_key(resource_type)
	}

	/// Unregistered resource types have no owner.
	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn is_resource_owner(
		&self,
		user_id: &UserId,
		resource_type: &str,
		resource_id: &str,
	) -> Result<bool> {
		let Some(lookup) = self.lookups.get(resource_type) else {
			tracing::debug!("no owner lookup registered");
			return Ok(false);
		};
		Ok(lookup.owner_of(resource_id).await?.as_ref() == Some(user_id))
	}
}
