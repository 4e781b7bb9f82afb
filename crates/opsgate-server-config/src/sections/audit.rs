// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit pipeline configuration section.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

const DEFAULT_QUEUE_CAPACITY: usize = 10000;

fn default_queue_capacity() -> usize {
	DEFAULT_QUEUE_CAPACITY
}

/// What the audit queue does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueOverflowPolicy {
	/// Drop the event being submitted and log a warning.
	#[default]
	DropNewest,
	/// Park the event in a sender that waits for queue space. At most
	/// `queue_capacity` senders wait at once; beyond that the event is dropped.
	Block,
}

impl FromStr for QueueOverflowPolicy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"drop_newest" => Ok(Self::DropNewest),
			"block" => Ok(Self::Block),
			other => Err(format!("unknown queue overflow policy '{other}'")),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditConfigLayer {
	pub enabled: Option<bool>,
	pub queue_capacity: Option<usize>,
	pub queue_overflow_policy: Option<QueueOverflowPolicy>,
	pub tracing_sink: Option<bool>,
}

impl AuditConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.queue_capacity.is_some() {
			self.queue_capacity = other.queue_capacity;
		}
		if other.queue_overflow_policy.is_some() {
			self.queue_overflow_policy = other.queue_overflow_policy;
		}
		if other.tracing_sink.is_some() {
			self.tracing_sink = other.tracing_sink;
		}
	}

	pub fn finalize(self) -> AuditConfig {
		AuditConfig {
			enabled: self.enabled.unwrap_or(true),
			queue_capacity: self.queue_capacity.unwrap_or_else(default_queue_capacity),
			queue_overflow_policy: self.queue_overflow_policy.unwrap_or_default(),
			tracing_sink: self.tracing_sink.unwrap_or(false),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditConfig {
	pub enabled: bool,
	pub queue_capacity: usize,
	pub queue_overflow_policy: QueueOverflowPolicy,
	/// Also emit every evaluation record as a tracing event.
	pub tracing_sink: bool,
}

impl Default for AuditConfig {
	fn default() -> Self {
		AuditConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let config = AuditConfig::default();
		assert!(config.enabled);
		assert_eq!(config.queue_capacity, 10000);
		assert_eq!(config.queue_overflow_policy, QueueOverflowPolicy::DropNewest);
		assert!(!config.tracing_sink);
	}

	#[test]
	fn later_layer_wins_only_where_set() {
		let mut layer = AuditConfigLayer {
			enabled: Some(false),
			queue_capacity: Some(64),
			..Default::default()
		};
		layer.merge(AuditConfigLayer {
			queue_overflow_policy: Some(QueueOverflowPolicy::Block),
			..Default::default()
		});
		let config = layer.finalize();
		assert!(!config.enabled);
		assert_eq!(config.queue_capacity, 64);
		assert_eq!(config.queue_overflow_policy, QueueOverflowPolicy::Block);
	}

	#[test]
	fn overflow_policy_parses_snake_case() {
		assert_eq!("block".parse::<QueueOverflowPolicy>(), Ok(QueueOverflowPolicy::Block));
		assert_eq!("DROP_NEWEST".parse::<QueueOverflowPolicy>(), Ok(QueueOverflowPolicy::DropNewest));
		assert!("drop_oldest".parse::<QueueOverflowPolicy>().is_err());
	}
}
