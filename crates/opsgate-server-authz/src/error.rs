// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for authorization services.

use opsgate_authz_core::{ConditionError, PolicyInputError};
use opsgate_server_db::DbError;
use thiserror::Error;

/// Result type for authorization services.
pub type Result<T> = std::result::Result<T, AuthzError>;

#[derive(Debug, Error)]
pub enum AuthzError {
	#[error("unauthorized: {0}")]
	Unauthorized(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("evaluation error: {0}")]
	Evaluation(String),

	#[error("internal error: {0}")]
	Internal(String),
}

impl AuthzError {
	/// HTTP status code a transport layer should answer with.
	pub fn status_code(&self) -> u16 {
		match self {
			AuthzError::Unauthorized(_) => 401,
			AuthzError::NotFound(_) => 404,
			AuthzError::InvalidInput(_) => 400,
			AuthzError::Conflict(_) => 409,
			AuthzError::Evaluation(_) => 422,
			AuthzError::Internal(_) => 500,
		}
	}
}

impl From<DbError> for AuthzError {
	fn from(err: DbError) -> Self {
		match err {
			DbError::NotFound(msg) => AuthzError::NotFound(msg),
			DbError::Conflict(msg) => AuthzError::Conflict(msg),
			other => {
				tracing::error!(error = %other, "database error");
				AuthzError::Internal(other.to_string())
			}
		}
	}
}

impl From<PolicyInputError> for AuthzError {
	fn from(err: PolicyInputError) -> Self {
		AuthzError::InvalidInput(err.to_string())
	}
}

impl From<ConditionError> for AuthzError {
	fn from(err: ConditionError) -> Self {
		AuthzError::InvalidInput(err.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn db_errors_map_by_kind() {
		let err: AuthzError = DbError::NotFound("policy x".to_string()).into();
		assert!(matches!(err, AuthzError::NotFound(ref m) if m == "policy x"));

		let err: AuthzError = DbError::Conflict("approver already voted".to_string()).into();
		assert_eq!(err.status_code(), 409);
		assert_eq!(err.to_string(), "conflict: approver already voted");

		let err: AuthzError = DbError::Internal("boom".to_string()).into();
		assert_eq!(err.status_code(), 500);
	}

	#[test]
	fn status_codes() {
		assert_eq!(AuthzError::Unauthorized(String::new()).status_code(), 401);
		assert_eq!(AuthzError::NotFound(String::new()).status_code(), 404);
		assert_eq!(AuthzError::InvalidInput(String::new()).status_code(), 400);
		assert_eq!(AuthzError::Evaluation(String::new()).status_code(), 422);
	}

	#[test]
	fn input_errors_are_bad_requests() {
		let err: AuthzError = PolicyInputError::EmptyName.into();
		assert_eq!(err.status_code(), 400);
		let err: AuthzError = ConditionError::Empty.into();
		assert_eq!(err.status_code(), 400);
	}
}
