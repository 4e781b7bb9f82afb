// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Column decoding shared by the repositories.
//!
//! UUIDs and timestamps are stored as TEXT (RFC 3339); enums as their
//! lowercase names; lists and trees as JSON text.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DbError;

pub(crate) fn parse_id<T: From<Uuid>>(value: &str, field: &str) -> Result<T, DbError> {
	Uuid::parse_str(value)
		.map(T::from)
		.map_err(|e| DbError::Internal(format!("Invalid {field} UUID: {e}")))
}

pub(crate) fn parse_opt_id<T: From<Uuid>>(
	value: Option<String>,
	field: &str,
) -> Result<Option<T>, DbError> {
	value.map(|v| parse_id(&v, field)).transpose()
}

pub(crate) fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("Invalid {field}: {e}")))
}

pub(crate) fn parse_opt_timestamp(
	value: Option<String>,
	field: &str,
) -> Result<Option<DateTime<Utc>>, DbError> {
	value.map(|v| parse_timestamp(&v, field)).transpose()
}

pub(crate) fn parse_enum<T>(value: &str) -> Result<T, DbError>
where
	T: FromStr,
	T::Err: Display,
{
	value
		.parse::<T>()
		.map_err(|e| DbError::Internal(e.to_string()))
}

pub(crate) fn parse_json<T: DeserializeOwned>(value: &str) -> Result<T, DbError> {
	Ok(serde_json::from_str(value)?)
}

pub(crate) fn opt_ts(value: Option<DateTime<Utc>>) -> Option<String> {
	value.map(|v| v.to_rfc3339())
}
