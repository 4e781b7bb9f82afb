// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for Opsgate authorization services.
//!
//! Values are layered from built-in defaults, a TOML file and `OPSGATE_*`
//! environment variables, highest precedence last.
//!
//! # Usage
//!
//! ```ignore
//! use opsgate_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("database: {}", config.database.url);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub audit: AuditConfig,
	pub authz: AuthzConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`OPSGATE_*`)
/// 2. Config file (`/etc/opsgate/authz.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only.
pub fn load_config_from_env() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![Box::new(EnvSource)])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize a merged layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let audit = layer.audit.unwrap_or_default().finalize();
	let authz = layer.authz.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	validate_config(&audit, &authz)?;

	info!(
		database = %database.url,
		audit_enabled = audit.enabled,
		audit_queue_capacity = audit.queue_capacity,
		super_admin_role = %authz.super_admin_role,
		trust_declared_role = authz.trust_declared_role,
		log_level = %logging.level,
		"Authorization configuration loaded"
	);

	Ok(ServerConfig {
		database,
		audit,
		authz,
		logging,
	})
}

/// Validate cross-field configuration rules.
fn validate_config(audit: &AuditConfig, authz: &AuthzConfig) -> Result<(), ConfigError> {
	let reserved = [
		("authz.super_admin_role", &authz.super_admin_role),
		("authz.wildcard_permission", &authz.wildcard_permission),
		("authz.business_admin_permission", &authz.business_admin_permission),
	];
	for (key, value) in reserved {
		if value.trim().is_empty() {
			return Err(ConfigError::Validation(format!("{key} must not be empty")));
		}
	}

	if audit.queue_capacity == 0 {
		return Err(ConfigError::Validation(
			"audit.queue_capacity must be at least 1".to_string(),
		));
	}

	if authz.default_required_approvals == 0 {
		return Err(ConfigError::Validation(
			"authz.default_required_approvals must be at least 1".to_string(),
		));
	}

	Ok(())
}
