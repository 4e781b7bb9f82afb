// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections. Each section has a partial `*ConfigLayer` used for
//! merging and a resolved `*Config` produced by `finalize`.

mod audit;
mod authz;
mod database;
mod logging;

pub use audit::{AuditConfig, AuditConfigLayer, QueueOverflowPolicy};
pub use authz::{AuthzConfig, AuthzConfigLayer};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
