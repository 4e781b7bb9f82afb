// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy condition trees.
//!
//! A condition is a closed tree of [`ConditionNode`]s parsed once from JSON:
//!
//! ```json
//! { "and": [
//!     { "attribute": "user.department", "operator": "equals", "value": "operations" },
//!     { "not": { "attribute": "environment.hour", "operator": "between", "value": [0, 6] } },
//!     { "or": [
//!         { "attribute": "resource.site", "operator": "in", "value": ["north", "south"] },
//!         { "attribute": "resource.owner", "operator": "equals", "value": "{{user.id}}" }
//!     ] }
//! ] }
//! ```
//!
//! Evaluation is fail-closed: a missing attribute or an unresolved `{{key}}`
//! template makes the leaf false. Operator or pattern problems surface as
//! [`ConditionError`] so the caller can degrade just the affected policy.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::context::AttributeContext;

/// Errors raised while parsing or evaluating a condition tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
	#[error("condition tree is empty")]
	Empty,

	#[error("'{0}' node must have at least one child")]
	NoChildren(&'static str),

	#[error("condition node is missing required field '{0}'")]
	MissingField(&'static str),

	#[error("condition node must be an object with one of: and, or, not, attribute")]
	InvalidShape,

	#[error("unsupported operator '{0}'")]
	UnsupportedOperator(String),

	#[error("operator '{operator}' expects {expected}")]
	InvalidOperand {
		operator: Operator,
		expected: &'static str,
	},

	#[error("invalid pattern '{pattern}': {message}")]
	InvalidPattern { pattern: String, message: String },
}

/// Comparison operators available to leaf conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
	Equals,
	NotEquals,
	GreaterThan,
	LessThan,
	GreaterThanOrEqual,
	LessThanOrEqual,
	Between,
	NotBetween,
	In,
	NotIn,
	Contains,
	StartsWith,
	EndsWith,
	Matches,
}

impl Operator {
	/// Canonical name used when serializing a tree.
	pub fn as_str(&self) -> &'static str {
		match self {
			Operator::Equals => "equals",
			Operator::NotEquals => "not_equals",
			Operator::GreaterThan => ">",
			Operator::LessThan => "<",
			Operator::GreaterThanOrEqual => ">=",
			Operator::LessThanOrEqual => "<=",
			Operator::Between => "between",
			Operator::NotBetween => "not_between",
			Operator::In => "in",
			Operator::NotIn => "not_in",
			Operator::Contains => "contains",
			Operator::StartsWith => "starts_with",
			Operator::EndsWith => "ends_with",
			Operator::Matches => "matches",
		}
	}
}

impl fmt::Display for Operator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Operator {
	type Err = ConditionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let op = match s.trim().to_ascii_lowercase().as_str() {
			"=" | "==" | "eq" | "equals" => Operator::Equals,
			"!=" | "<>" | "ne" | "not_equals" => Operator::NotEquals,
			">" | "gt" | "greater_than" => Operator::GreaterThan,
			"<" | "lt" | "less_than" => Operator::LessThan,
			">=" | "gte" | "greater_than_or_equal" => Operator::GreaterThanOrEqual,
			"<=" | "lte" | "less_than_or_equal" => Operator::LessThanOrEqual,
			"between" => Operator::Between,
			"not_between" => Operator::NotBetween,
			"in" => Operator::In,
			"not_in" => Operator::NotIn,
			"contains" => Operator::Contains,
			"starts_with" => Operator::StartsWith,
			"ends_with" => Operator::EndsWith,
			"matches" | "regex" => Operator::Matches,
			_ => return Err(ConditionError::UnsupportedOperator(s.to_string())),
		};
		Ok(op)
	}
}

/// A compiled `matches` pattern.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
	pub fn as_str(&self) -> &str {
		self.0.as_str()
	}

	pub fn is_match(&self, haystack: &str) -> bool {
		self.0.is_match(haystack)
	}
}

impl PartialEq for Pattern {
	fn eq(&self, other: &Self) -> bool {
		self.as_str() == other.as_str()
	}
}

/// A parsed condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ConditionNode {
	And(Vec<ConditionNode>),
	Or(Vec<ConditionNode>),
	Not(Box<ConditionNode>),
	Leaf {
		attribute: String,
		operator: Operator,
		value: Value,
		/// Literal `matches` operands are compiled when the tree is parsed.
		pattern: Option<Pattern>,
	},
}

impl ConditionNode {
	/// Leaf constructor used by tests and builders.
	///
	/// An invalid literal pattern is kept uncompiled and reported at evaluation.
	pub fn leaf(attribute: impl Into<String>, operator: Operator, value: Value) -> Self {
		let pattern = literal_pattern(operator, &value).ok().flatten();
		ConditionNode::Leaf {
			attribute: attribute.into(),
			operator,
			value,
			pattern,
		}
	}

	/// Parses and validates a JSON condition tree.
	pub fn parse(value: &Value) -> Result<Self, ConditionError> {
		let obj = match value {
			Value::Null => return Err(ConditionError::Empty),
			Value::Object(obj) if obj.is_empty() => return Err(ConditionError::Empty),
			Value::Object(obj) => obj,
			_ => return Err(ConditionError::InvalidShape),
		};
		Self::parse_object(obj)
	}

	fn parse_object(obj: &Map<String, Value>) -> Result<Self, ConditionError> {
		if let Some(children) = get_ci(obj, "and") {
			return Ok(ConditionNode::And(Self::parse_children(children, "and")?));
		}
		if let Some(children) = get_ci(obj, "or") {
			return Ok(ConditionNode::Or(Self::parse_children(children, "or")?));
		}
		if let Some(inner) = get_ci(obj, "not") {
			return Ok(ConditionNode::Not(Box::new(Self::parse(inner)?)));
		}

		let attribute = match obj.get("attribute") {
			Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
			Some(_) | None => return Err(ConditionError::MissingField("attribute")),
		};
		let operator = match obj.get("operator") {
			Some(Value::String(s)) => s.parse::<Operator>()?,
			Some(_) | None => return Err(ConditionError::MissingField("operator")),
		};
		let value = obj
			.get("value")
			.cloned()
			.ok_or(ConditionError::MissingField("value"))?;

		validate_operand(operator, &value)?;
		let pattern = literal_pattern(operator, &value)?;

		Ok(ConditionNode::Leaf {
			attribute,
			operator,
			value,
			pattern,
		})
	}

	fn parse_children(value: &Value, kind: &'static str) -> Result<Vec<Self>, ConditionError> {
		let items = value.as_array().ok_or(ConditionError::InvalidShape)?;
		if items.is_empty() {
			return Err(ConditionError::NoChildren(kind));
		}
		items.iter().map(Self::parse).collect()
	}

	/// Serializes back to the JSON shape accepted by [`ConditionNode::parse`].
	pub fn to_value(&self) -> Value {
		match self {
			ConditionNode::And(children) => {
				serde_json::json!({ "and": children.iter().map(Self::to_value).collect::<Vec<_>>() })
			}
			ConditionNode::Or(children) => {
				serde_json::json!({ "or": children.iter().map(Self::to_value).collect::<Vec<_>>() })
			}
			ConditionNode::Not(inner) => serde_json::json!({ "not": inner.to_value() }),
			ConditionNode::Leaf {
				attribute,
				operator,
				value,
				..
			} => serde_json::json!({
				"attribute": attribute,
				"operator": operator.as_str(),
				"value": value,
			}),
		}
	}

	/// Evaluates the tree against `ctx`.
	///
	/// `And` stops at the first false child and `Or` at the first true one, so
	/// an error in a child that is never reached does not surface.
	pub fn evaluate(&self, ctx: &AttributeContext) -> Result<bool, ConditionError> {
		match self {
			ConditionNode::And(children) => {
				for child in children {
					if !child.evaluate(ctx)? {
						return Ok(false);
					}
				}
				Ok(true)
			}
			ConditionNode::Or(children) => {
				for child in children {
					if child.evaluate(ctx)? {
						return Ok(true);
					}
				}
				Ok(false)
			}
			ConditionNode::Not(inner) => Ok(!inner.evaluate(ctx)?),
			ConditionNode::Leaf {
				attribute,
				operator,
				value,
				pattern,
			} => {
				let Some(actual) = ctx.get(attribute) else {
					return Ok(false);
				};
				if let Some(pattern) = pattern {
					return Ok(pattern.is_match(&display_value(actual)));
				}
				let Some(expected) = resolve_template(value, ctx) else {
					return Ok(false);
				};
				compare(*operator, actual, &expected)
			}
		}
	}
}

impl TryFrom<Value> for ConditionNode {
	type Error = ConditionError;

	fn try_from(value: Value) -> Result<Self, Self::Error> {
		ConditionNode::parse(&value)
	}
}

impl From<ConditionNode> for Value {
	fn from(node: ConditionNode) -> Self {
		node.to_value()
	}
}

fn get_ci<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
	obj
		.iter()
		.find(|(k, _)| k.eq_ignore_ascii_case(key))
		.map(|(_, v)| v)
}

/// Returns the `key` of a `{{key}}` template string.
fn template_key(value: &Value) -> Option<&str> {
	let s = value.as_str()?.trim();
	let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
	Some(inner.trim())
}

fn resolve_template<'a>(value: &'a Value, ctx: &'a AttributeContext) -> Option<Cow<'a, Value>> {
	match template_key(value) {
		Some(key) => ctx.get(key).map(Cow::Borrowed),
		None => Some(Cow::Borrowed(value)),
	}
}

/// Rejects literal operands whose shape can never satisfy the operator.
fn validate_operand(operator: Operator, value: &Value) -> Result<(), ConditionError> {
	if template_key(value).is_some() {
		return Ok(());
	}
	match operator {
		Operator::Between | Operator::NotBetween => match value.as_array() {
			Some(bounds) if bounds.len() == 2 => Ok(()),
			_ => Err(ConditionError::InvalidOperand {
				operator,
				expected: "a two-element [low, high] array",
			}),
		},
		Operator::In | Operator::NotIn => match value {
			Value::Array(_) | Value::String(_) => Ok(()),
			_ => Err(ConditionError::InvalidOperand {
				operator,
				expected: "an array or comma-separated string",
			}),
		},
		Operator::Matches => match value {
			Value::String(_) => Ok(()),
			_ => Err(ConditionError::InvalidOperand {
				operator,
				expected: "a regular expression string",
			}),
		},
		_ => Ok(()),
	}
}

/// Compiles the operand of a `matches` leaf unless it is a template.
fn literal_pattern(operator: Operator, value: &Value) -> Result<Option<Pattern>, ConditionError> {
	if operator != Operator::Matches || template_key(value).is_some() {
		return Ok(None);
	}
	match value.as_str() {
		Some(pattern) => compile_pattern(pattern).map(|re| Some(Pattern(re))),
		None => Ok(None),
	}
}

fn compile_pattern(pattern: &str) -> Result<Regex, ConditionError> {
	Regex::new(pattern).map_err(|e| ConditionError::InvalidPattern {
		pattern: pattern.to_string(),
		message: e.to_string(),
	})
}

/// String representation used by equality, membership and string operators.
///
/// Integral numbers render without a fractional part so `42` and `42.0` compare equal.
pub fn display_value(value: &Value) -> Cow<'_, str> {
	match value {
		Value::String(s) => Cow::Borrowed(s.as_str()),
		Value::Null => Cow::Borrowed(""),
		Value::Number(n) => {
			if let Some(i) = n.as_i64() {
				Cow::Owned(i.to_string())
			} else if let Some(u) = n.as_u64() {
				Cow::Owned(u.to_string())
			} else {
				match n.as_f64() {
					Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
						Cow::Owned(format!("{}", f as i64))
					}
					_ => Cow::Owned(n.to_string()),
				}
			}
		}
		other => Cow::Owned(other.to_string()),
	}
}

/// Numeric view of a value; numeric strings count.
pub fn numeric_value(value: &Value) -> Option<f64> {
	match value {
		Value::Number(n) => n.as_f64(),
		Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
		_ => None,
	}
}

fn membership_list(value: &Value) -> Vec<Cow<'_, str>> {
	match value {
		Value::Array(items) => items.iter().map(display_value).collect(),
		Value::String(s) => s
			.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(Cow::Borrowed)
			.collect(),
		other => vec![display_value(other)],
	}
}

fn is_member(actual: &Value, expected: &Value) -> bool {
	let list = membership_list(expected);
	match actual {
		Value::Array(items) => items
			.iter()
			.any(|item| list.iter().any(|candidate| *candidate == display_value(item))),
		_ => {
			let actual = display_value(actual);
			list.iter().any(|candidate| *candidate == actual)
		}
	}
}

fn between(actual: &Value, bounds: &Value) -> Option<bool> {
	let bounds = bounds.as_array().filter(|b| b.len() == 2)?;
	let low = numeric_value(&bounds[0])?;
	let high = numeric_value(&bounds[1])?;
	let actual = numeric_value(actual)?;
	Some(actual >= low && actual <= high)
}

fn numeric_compare(actual: &Value, expected: &Value, cmp: fn(f64, f64) -> bool) -> bool {
	match (numeric_value(actual), numeric_value(expected)) {
		(Some(a), Some(e)) => cmp(a, e),
		_ => false,
	}
}

fn compare(operator: Operator, actual: &Value, expected: &Value) -> Result<bool, ConditionError> {
	let result = match operator {
		Operator::Equals => display_value(actual) == display_value(expected),
		Operator::NotEquals => display_value(actual) != display_value(expected),
		Operator::GreaterThan => numeric_compare(actual, expected, |a, e| a > e),
		Operator::LessThan => numeric_compare(actual, expected, |a, e| a < e),
		Operator::GreaterThanOrEqual => numeric_compare(actual, expected, |a, e| a >= e),
		Operator::LessThanOrEqual => numeric_compare(actual, expected, |a, e| a <= e),
		Operator::Between => between(actual, expected).unwrap_or(false),
		Operator::NotBetween => between(actual, expected).map(|b| !b).unwrap_or(false),
		Operator::In => is_member(actual, expected),
		Operator::NotIn => !is_member(actual, expected),
		Operator::Contains => match actual {
			Value::Array(items) => {
				let needle = display_value(expected);
				items.iter().any(|item| display_value(item) == needle)
			}
			_ => display_value(actual).contains(display_value(expected).as_ref()),
		},
		Operator::StartsWith => display_value(actual).starts_with(display_value(expected).as_ref()),
		Operator::EndsWith => display_value(actual).ends_with(display_value(expected).as_ref()),
		Operator::Matches => {
			let pattern = expected.as_str().ok_or(ConditionError::InvalidOperand {
				operator,
				expected: "a regular expression string",
			})?;
			compile_pattern(pattern)?.is_match(&display_value(actual))
		}
	};
	Ok(result)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn ctx(pairs: &[(&str, Value)]) -> AttributeContext {
		let mut ctx = AttributeContext::new();
		for (k, v) in pairs {
			ctx.insert(*k, v.clone());
		}
		ctx
	}

	fn eval(tree: Value, ctx: &AttributeContext) -> Result<bool, ConditionError> {
		ConditionNode::parse(&tree).unwrap().evaluate(ctx)
	}

	mod parsing {
		use super::*;

		#[test]
		fn parses_nested_tree() {
			let tree = json!({
				"and": [
					{ "attribute": "user.department", "operator": "EQUALS", "value": "ops" },
					{ "not": { "attribute": "environment.hour", "operator": "between", "value": [0, 6] } },
				]
			});
			let node = ConditionNode::parse(&tree).unwrap();
			match node {
				ConditionNode::And(children) => {
					assert_eq!(children.len(), 2);
					assert!(matches!(children[1], ConditionNode::Not(_)));
				}
				other => panic!("expected And, got {other:?}"),
			}
		}

		#[test]
		fn rejects_empty_tree() {
			assert_eq!(ConditionNode::parse(&json!({})), Err(ConditionError::Empty));
			assert_eq!(ConditionNode::parse(&Value::Null), Err(ConditionError::Empty));
		}

		#[test]
		fn rejects_logical_node_without_children() {
			assert_eq!(
				ConditionNode::parse(&json!({ "and": [] })),
				Err(ConditionError::NoChildren("and"))
			);
			assert_eq!(
				ConditionNode::parse(&json!({ "or": [] })),
				Err(ConditionError::NoChildren("or"))
			);
		}

		#[test]
		fn rejects_missing_leaf_fields() {
			assert_eq!(
				ConditionNode::parse(&json!({ "operator": "equals", "value": 1 })),
				Err(ConditionError::MissingField("attribute"))
			);
			assert_eq!(
				ConditionNode::parse(&json!({ "attribute": "a", "value": 1 })),
				Err(ConditionError::MissingField("operator"))
			);
			assert_eq!(
				ConditionNode::parse(&json!({ "attribute": "a", "operator": "equals" })),
				Err(ConditionError::MissingField("value"))
			);
		}

		#[test]
		fn rejects_unsupported_operator() {
			let err = ConditionNode::parse(&json!({ "attribute": "a", "operator": "resembles", "value": 1 }))
				.unwrap_err();
			assert_eq!(err, ConditionError::UnsupportedOperator("resembles".to_string()));
		}

		#[test]
		fn rejects_malformed_between_and_pattern() {
			assert!(matches!(
				ConditionNode::parse(&json!({ "attribute": "a", "operator": "between", "value": [1] })),
				Err(ConditionError::InvalidOperand { .. })
			));
			assert!(matches!(
				ConditionNode::parse(&json!({ "attribute": "a", "operator": "matches", "value": "(" })),
				Err(ConditionError::InvalidPattern { .. })
			));
		}

		#[test]
		fn literal_patterns_compile_once_at_parse() {
			let literal = ConditionNode::parse(
				&json!({ "attribute": "a", "operator": "matches", "value": "^x+$" }),
			)
			.unwrap();
			match &literal {
				ConditionNode::Leaf { pattern, .. } => {
					assert_eq!(pattern.as_ref().map(Pattern::as_str), Some("^x+$"));
				}
				other => panic!("expected Leaf, got {other:?}"),
			}

			let templated = ConditionNode::parse(
				&json!({ "attribute": "a", "operator": "matches", "value": "{{user.pattern}}" }),
			)
			.unwrap();
			assert!(matches!(templated, ConditionNode::Leaf { pattern: None, .. }));

			let c = ctx(&[("a", json!("xxx")), ("user.pattern", json!("^x"))]);
			assert_eq!(literal.evaluate(&c), Ok(true));
			assert_eq!(templated.evaluate(&c), Ok(true));
		}

		#[test]
		fn template_operands_skip_shape_validation() {
			assert!(ConditionNode::parse(
				&json!({ "attribute": "a", "operator": "between", "value": "{{limits}}" })
			)
			.is_ok());
		}

		#[test]
		fn to_value_reparses_to_same_tree() {
			let tree = json!({
				"or": [
					{ "attribute": "a", "operator": "in", "value": ["x", "y"] },
					{ "not": { "attribute": "b", "operator": ">=", "value": 3 } },
				]
			});
			let node = ConditionNode::parse(&tree).unwrap();
			assert_eq!(ConditionNode::parse(&node.to_value()).unwrap(), node);
		}

		#[test]
		fn serde_uses_validated_parse() {
			let parsed: Result<ConditionNode, _> = serde_json::from_value(json!({ "and": [] }));
			assert!(parsed.is_err());
		}
	}

	mod evaluation {
		use super::*;

		#[test]
		fn missing_attribute_is_false() {
			let c = ctx(&[]);
			assert_eq!(
				eval(json!({ "attribute": "user.level", "operator": "equals", "value": "x" }), &c),
				Ok(false)
			);
			assert_eq!(
				eval(json!({ "attribute": "user.level", "operator": "not_equals", "value": "x" }), &c),
				Ok(false)
			);
		}

		#[test]
		fn equality_uses_string_representation() {
			let c = ctx(&[("user.clearance", json!(3)), ("user.flag", json!(true))]);
			assert_eq!(
				eval(json!({ "attribute": "user.clearance", "operator": "=", "value": "3" }), &c),
				Ok(true)
			);
			assert_eq!(
				eval(json!({ "attribute": "user.flag", "operator": "==", "value": "true" }), &c),
				Ok(true)
			);
			let c = ctx(&[("n", json!(42.0))]);
			assert_eq!(
				eval(json!({ "attribute": "n", "operator": "eq", "value": 42 }), &c),
				Ok(true)
			);
		}

		#[test]
		fn numeric_comparisons() {
			let c = ctx(&[("environment.hour", json!(14))]);
			let check = |op: &str, v: Value| {
				eval(json!({ "attribute": "environment.hour", "operator": op, "value": v }), &c).unwrap()
			};
			assert!(check(">", json!(9)));
			assert!(check("<", json!("18")));
			assert!(check(">=", json!(14)));
			assert!(check("<=", json!(14)));
			assert!(!check(">", json!("not a number")));
		}

		#[test]
		fn between_is_inclusive_and_fails_closed() {
			let c = ctx(&[("h", json!(9)), ("s", json!("abc"))]);
			let check = |attr: &str, op: &str, v: Value| {
				eval(json!({ "attribute": attr, "operator": op, "value": v }), &c).unwrap()
			};
			assert!(check("h", "between", json!([9, 17])));
			assert!(check("h", "BETWEEN", json!([0, 9])));
			assert!(!check("h", "between", json!([10, 17])));
			assert!(check("h", "not_between", json!([10, 17])));
			assert!(!check("s", "between", json!([0, 10])));
			assert!(!check("s", "not_between", json!([0, 10])));
			assert!(!check("h", "not_between", json!(["low", 10])));
		}

		#[test]
		fn membership_operators() {
			let c = ctx(&[("user.site", json!("north")), ("user.tags", json!(["a", "b"]))]);
			let check = |attr: &str, op: &str, v: Value| {
				eval(json!({ "attribute": attr, "operator": op, "value": v }), &c).unwrap()
			};
			assert!(check("user.site", "in", json!(["north", "south"])));
			assert!(check("user.site", "in", json!("east, north")));
			assert!(!check("user.site", "not_in", json!(["north"])));
			assert!(check("user.site", "not_in", json!(["west"])));
			assert!(check("user.tags", "in", json!(["b", "z"])));
		}

		#[test]
		fn string_operators() {
			let c = ctx(&[("resource.path", json!("/sites/north/reports")), ("tags", json!(["x", "y"]))]);
			let check = |attr: &str, op: &str, v: Value| {
				eval(json!({ "attribute": attr, "operator": op, "value": v }), &c).unwrap()
			};
			assert!(check("resource.path", "contains", json!("north")));
			assert!(check("resource.path", "starts_with", json!("/sites")));
			assert!(check("resource.path", "ends_with", json!("reports")));
			assert!(check("resource.path", "matches", json!("^/sites/[a-z]+/reports$")));
			assert!(!check("resource.path", "matches", json!("^/admin")));
			assert!(check("tags", "contains", json!("y")));
		}

		#[test]
		fn template_resolves_against_context() {
			let c = ctx(&[("resource.owner", json!("u-1")), ("user.id", json!("u-1"))]);
			assert_eq!(
				eval(
					json!({ "attribute": "resource.owner", "operator": "equals", "value": "{{ user.id }}" }),
					&c
				),
				Ok(true)
			);
		}

		#[test]
		fn unresolved_template_is_false() {
			let c = ctx(&[("resource.owner", json!("u-1"))]);
			assert_eq!(
				eval(
					json!({ "attribute": "resource.owner", "operator": "not_equals", "value": "{{user.id}}" }),
					&c
				),
				Ok(false)
			);
		}

		#[test]
		fn logical_nodes_short_circuit() {
			let c = ctx(&[("a", json!("1")), ("p", json!("x"))]);
			let bad_leaf = ConditionNode::leaf("p", Operator::Matches, json!("("));

			let and = ConditionNode::And(vec![
				ConditionNode::leaf("a", Operator::Equals, json!("2")),
				bad_leaf.clone(),
			]);
			assert_eq!(and.evaluate(&c), Ok(false));

			let or = ConditionNode::Or(vec![
				ConditionNode::leaf("a", Operator::Equals, json!("1")),
				bad_leaf.clone(),
			]);
			assert_eq!(or.evaluate(&c), Ok(true));

			let reached = ConditionNode::And(vec![
				ConditionNode::leaf("a", Operator::Equals, json!("1")),
				bad_leaf,
			]);
			assert!(matches!(
				reached.evaluate(&c),
				Err(ConditionError::InvalidPattern { .. })
			));
		}

		#[test]
		fn not_inverts() {
			let c = ctx(&[("a", json!("1"))]);
			assert_eq!(
				eval(json!({ "not": { "attribute": "a", "operator": "equals", "value": "2" } }), &c),
				Ok(true)
			);
		}
	}

	#[test]
	fn operator_names_are_case_insensitive() {
		assert_eq!("Starts_With".parse::<Operator>().unwrap(), Operator::StartsWith);
		assert_eq!("NOT_IN".parse::<Operator>().unwrap(), Operator::NotIn);
		assert_eq!(">=".parse::<Operator>().unwrap(), Operator::GreaterThanOrEqual);
	}

	#[test]
	fn display_value_normalizes_integral_floats() {
		assert_eq!(display_value(&json!(42.0)), "42");
		assert_eq!(display_value(&json!(1.5)), "1.5");
		assert_eq!(display_value(&json!("x")), "x");
	}
}
