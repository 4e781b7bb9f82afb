// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission-name and policy-target matching.
//!
//! Permission names are `:`-separated segments (`project:read`,
//! `site:inspection:create`). A `*` segment in a granted permission matches
//! exactly one segment of the required permission; a trailing `*` also matches
//! any longer tail. Granted segments beyond the required permission's length
//! match only when they are all `*`, which lets `*:*:*` cover every name.
//!
//! Policy action and resource-type lists use a looser, prefix-based rule, see
//! [`target_matches`].

use std::collections::BTreeSet;

/// Separator between permission segments.
pub const SEGMENT_SEPARATOR: char = ':';

/// Single-segment wildcard.
pub const WILDCARD: &str = "*";

/// Returns true if the `granted` permission pattern covers `required`.
///
/// Matching is case-sensitive.
pub fn permission_matches(granted: &str, required: &str) -> bool {
	if granted == required {
		return true;
	}

	let granted_segments: Vec<&str> = granted.split(SEGMENT_SEPARATOR).collect();
	let required_segments: Vec<&str> = required.split(SEGMENT_SEPARATOR).collect();

	for (index, pattern) in granted_segments.iter().enumerate() {
		match required_segments.get(index) {
			Some(segment) => {
				if *pattern != WILDCARD && pattern != segment {
					return false;
				}
			}
			None => {
				return granted_segments[index..].iter().all(|p| *p == WILDCARD);
			}
		}
	}

	if required_segments.len() > granted_segments.len() {
		return granted_segments.last().is_some_and(|p| *p == WILDCARD);
	}

	true
}

/// Returns true if any permission in `granted` covers `required`.
pub fn has_permission<'a, I>(granted: I, required: &str) -> bool
where
	I: IntoIterator<Item = &'a String>,
{
	granted
		.into_iter()
		.any(|permission| permission_matches(permission, required))
}

/// Returns true if `permissions` contains `name` exactly (no wildcard expansion).
pub fn holds_exact(permissions: &BTreeSet<String>, name: &str) -> bool {
	permissions.contains(name)
}

/// Returns true if a policy target list admits `value`.
///
/// An empty list admits everything. Otherwise an entry admits `value` when it
/// equals it, is `*`, or ends in `*` and the remaining prefix starts `value`.
pub fn target_matches(entries: &[String], value: &str) -> bool {
	if entries.is_empty() {
		return true;
	}

	entries.iter().any(|entry| {
		if entry == WILDCARD || entry == value {
			return true;
		}
		match entry.strip_suffix('*') {
			Some(prefix) => value.starts_with(prefix),
			None => false,
		}
	})
}
