// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Operator CLI for the Opsgate authorization core.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Args as ClapArgs, Parser, Subcommand};
use opsgate_authz_core::{ApprovalRequest, PolicyId, UserId};
use opsgate_server_authz::{
	start_audit, AuthorizationRequest, AuthzServices, EvaluationRequest, PermissionEligibility,
	Principal,
};
use opsgate_server_config::ServerConfig;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
	name = "opsgate-authz",
	about = "Inspect and exercise Opsgate authorization",
	version
)]
struct Args {
	/// Config file layered between defaults and environment
	#[arg(long, global = true, env = "OPSGATE_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Apply database migrations
	Migrate,

	/// Authorize a principal and print the decision as JSON
	Check {
		#[command(flatten)]
		target: Target,

		/// Role claimed by the identity layer
		#[arg(long)]
		role: Option<String>,

		/// Business vertical id, code or name
		#[arg(long)]
		vertical: Option<String>,
	},

	/// Dry-run one policy regardless of its status
	TestPolicy {
		policy_id: PolicyId,

		#[command(flatten)]
		target: Target,
	},

	/// List pending approval requests
	PendingApprovals {
		/// Only requests this user may vote on
		#[arg(long)]
		approver: Option<UserId>,

		/// Permission an approver must hold
		#[arg(long, default_value = "policy:approve", requires = "approver")]
		permission: String,
	},
}

#[derive(ClapArgs, Debug)]
struct Target {
	/// Subject id (UUID)
	#[arg(long)]
	subject: String,

	/// Action, also the required permission (`resource:action`)
	#[arg(long)]
	action: String,

	#[arg(long)]
	resource_type: String,

	#[arg(long)]
	resource_id: Option<String>,

	/// Environment attribute as KEY=VALUE; VALUE is parsed as JSON when possible
	#[arg(long = "env", value_parser = parse_env_pair)]
	environment: Vec<(String, Value)>,
}

impl Target {
	fn environment(&self) -> BTreeMap<String, Value> {
		self.environment.iter().cloned().collect()
	}
}

fn parse_env_pair(raw: &str) -> Result<(String, Value), String> {
	let (key, value) = raw
		.split_once('=')
		.ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
	let key = key.trim();
	if key.is_empty() {
		return Err("environment key must not be empty".to_string());
	}
	let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
	Ok((key.to_string(), value))
}

fn init_tracing(config: &ServerConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);
	if config.logging.json {
		registry
			.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
			.init();
	} else {
		registry
			.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
			.init();
	}
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => opsgate_server_config::load_config_with_file(path),
		None => opsgate_server_config::load_config(),
	}
	.context("loading configuration")?;

	init_tracing(&config);

	let pool = opsgate_server_db::create_pool(&config.database.url)
		.await
		.with_context(|| format!("opening {}", config.database.url))?;

	if let Command::Migrate = args.command {
		opsgate_server_db::run_migrations(&pool).await?;
		tracing::info!(database = %config.database.url, "migrations applied");
		return Ok(());
	}

	let audit = start_audit(&pool, &config.audit);
	let services = AuthzServices::new(pool, &config, audit.clone());

	match args.command {
		Command::Migrate => {}
		Command::Check {
			target,
			role,
			vertical,
		} => {
			let environment = target.environment();
			let request = AuthorizationRequest {
				principal: Principal {
					subject_id: target.subject,
					role,
				},
				action: target.action,
				resource_type: target.resource_type,
				resource_id: target.resource_id,
				business_vertical: vertical,
				environment,
			};
			let decision = services.authorizer.authorize(&request).await?;
			print_json(&decision)?;
		}
		Command::TestPolicy { policy_id, target } => {
			let subject_id: UserId = target
				.subject
				.parse()
				.map_err(|_| anyhow!("subject must be a UUID"))?;
			let environment = target.environment();
			let request = EvaluationRequest {
				subject_id,
				action: target.action,
				resource_type: target.resource_type,
				resource_id: target.resource_id,
				environment,
				business_vertical: None,
			};
			let result = services.engine.test_policy(&policy_id, &request).await?;
			print_json(&result)?;
		}
		Command::PendingApprovals {
			approver,
			permission,
		} => {
			let pending = match approver {
				Some(approver) => {
					let eligibility = PermissionEligibility::new(services.rbac.clone(), permission);
					services.approvals.list_pending(&approver, &eligibility).await?
				}
				None => {
					let everyone = |_: &UserId, _: &ApprovalRequest| true;
					services.approvals.list_pending(&UserId::generate(), &everyone).await?
				}
			};
			print_json(&pending)?;
		}
	}

	if let Some(audit) = audit {
		audit.flush().await;
	}
	Ok(())
}
