// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite persistence for Opsgate authorization.
//!
//! Each repository owns a clone of the pool and exposes its operations both as
//! inherent methods and through a `*Store` trait so services can be tested
//! against fakes.

pub mod approval;
pub mod attribute;
pub mod error;
pub mod evaluation;
pub mod policy;
pub mod pool;
pub mod rbac;
mod row;
pub mod testing;

pub use approval::{
	ApprovalRepository, ApprovalStore, VoteRecord, APPROVER_ALREADY_VOTED, REQUEST_ALREADY_RESOLVED,
};
pub use attribute::{AttributeRepository, AttributeStore};
pub use error::{DbError, Result};
pub use evaluation::{EvaluationRepository, EvaluationStore};
pub use policy::{PolicyRepository, PolicyStore};
pub use pool::{create_pool, run_migrations};
pub use rbac::{RbacRepository, RbacStore};
