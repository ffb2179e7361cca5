// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scope rules: row-level narrowing of a policy.
//!
//! A [`ScopeRule`] compares a field of the resource against a [`ScopeValue`].
//! Values are either literals or references to the acting user
//! ([`ActorField`]), parsed once when the rule is loaded and resolved against
//! the [`Actor`] for each evaluation. A matched rule yields a [`ScopeFilter`]
//! that the storage layer turns into a query predicate.
//!
//! Stored literals stay strings. Only the operators that need a typed target
//! read one out of them (see [`Operator::typed_target`]). Comparisons are
//! strict and fail closed: mismatched operand types compare as `false`, never
//! as an error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::types::{Actor, PolicyId, ScopeRuleId, UnknownVariant};

/// Prefix marking a stored value as a reference to the actor.
pub const ACTOR_PREFIX: &str = "$actor.";

// =============================================================================
// Operators
// =============================================================================

/// Comparison applied between a resource field and the resolved rule value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
	Eq,
	Neq,
	In,
	Nin,
	Contains,
	Exists,
	Gt,
	Gte,
	Lt,
	Lte,
}

impl Operator {
	pub fn as_str(&self) -> &'static str {
		match self {
			Operator::Eq => "eq",
			Operator::Neq => "neq",
			Operator::In => "in",
			Operator::Nin => "nin",
			Operator::Contains => "contains",
			Operator::Exists => "exists",
			Operator::Gt => "gt",
			Operator::Gte => "gte",
			Operator::Lt => "lt",
			Operator::Lte => "lte",
		}
	}

	/// The comparison target for `value` under this operator.
	///
	/// A string target is read as a number for `gt`/`gte`/`lt`/`lte`, as
	/// `true`/`false` for `exists` and as a JSON array for `in`/`nin`. A string
	/// that does not read as that type is kept, and the comparison fails.
	/// `eq`, `neq` and `contains` compare strings as stored.
	pub fn typed_target<'a>(&self, value: &'a Value) -> Cow<'a, Value> {
		let Value::String(raw) = value else {
			return Cow::Borrowed(value);
		};
		let typed = match self {
			Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
				serde_json::from_str::<Value>(raw.trim())
					.ok()
					.filter(Value::is_number)
			}
			Operator::Exists => match raw.trim() {
				"true" => Some(Value::Bool(true)),
				"false" => Some(Value::Bool(false)),
				_ => None,
			},
			Operator::In | Operator::Nin => serde_json::from_str::<Value>(raw.trim())
				.ok()
				.filter(Value::is_array),
			Operator::Eq | Operator::Neq | Operator::Contains => None,
		};
		typed.map_or(Cow::Borrowed(value), Cow::Owned)
	}

	/// Compares a resource field (absent when `None`) against `target`.
	pub fn compare(&self, field: Option<&Value>, target: &Value) -> bool {
		let target = self.typed_target(target);
		let target = target.as_ref();
		match self {
			Operator::Eq => field.is_some_and(|value| json_eq(value, target)),
			Operator::Neq => !field.is_some_and(|value| json_eq(value, target)),
			Operator::In => match target {
				Value::Array(items) => field.is_some_and(|value| contains_value(items, value)),
				_ => false,
			},
			Operator::Nin => match target {
				Value::Array(items) => !field.is_some_and(|value| contains_value(items, value)),
				_ => true,
			},
			Operator::Contains => match (field, target) {
				(Some(Value::String(haystack)), Value::String(needle)) => haystack.contains(needle.as_str()),
				(Some(Value::Array(items)), needle) => contains_value(items, needle),
				_ => false,
			},
			Operator::Exists => match target {
				Value::Bool(must_exist) => {
					let present = field.is_some_and(|value| !value.is_null());
					present == *must_exist
				}
				_ => false,
			},
			Operator::Gt => compare_numbers(field, target, |a, b| a > b),
			Operator::Gte => compare_numbers(field, target, |a, b| a >= b),
			Operator::Lt => compare_numbers(field, target, |a, b| a < b),
			Operator::Lte => compare_numbers(field, target, |a, b| a <= b),
		}
	}
}

impl fmt::Display for Operator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Operator {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"eq" => Ok(Operator::Eq),
			"neq" => Ok(Operator::Neq),
			"in" => Ok(Operator::In),
			"nin" => Ok(Operator::Nin),
			"contains" => Ok(Operator::Contains),
			"exists" => Ok(Operator::Exists),
			"gt" => Ok(Operator::Gt),
			"gte" => Ok(Operator::Gte),
			"lt" => Ok(Operator::Lt),
			"lte" => Ok(Operator::Lte),
			other => Err(UnknownVariant {
				kind: "operator",
				value: other.to_string(),
			}),
		}
	}
}

/// Structural equality where numbers compare by value, so `1` equals `1.0`.
pub fn json_eq(a: &Value, b: &Value) -> bool {
	match (a, b) {
		(Value::Number(x), Value::Number(y)) => {
			if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
				x == y
			} else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
				x == y
			} else {
				x.as_f64() == y.as_f64()
			}
		}
		(Value::Array(x), Value::Array(y)) => {
			x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_eq(a, b))
		}
		(Value::Object(x), Value::Object(y)) => {
			x.len() == y.len()
				&& x
					.iter()
					.all(|(key, a)| y.get(key).is_some_and(|b| json_eq(a, b)))
		}
		_ => a == b,
	}
}

fn contains_value(items: &[Value], needle: &Value) -> bool {
	items.iter().any(|item| json_eq(item, needle))
}

fn compare_numbers(field: Option<&Value>, target: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
	match (field.and_then(Value::as_f64), target.as_f64()) {
		(Some(a), Some(b)) => cmp(a, b),
		_ => false,
	}
}

/// Looks up a dotted path in a JSON object.
///
/// Numeric segments index into arrays. Returns `None` when any segment is
/// missing or traverses a primitive.
pub fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
	let mut segments = path.split('.');
	let mut current = root.get(segments.next()?)?;
	for segment in segments {
		current = match current {
			Value::Object(map) => map.get(segment)?,
			Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
			_ => return None,
		};
	}
	Some(current)
}

// =============================================================================
// Scope Values
// =============================================================================

/// A property of the acting user a scope rule can reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActorField {
	UserId,
	OrganizationId,
	Roles,
	/// Dotted path into the actor's attributes.
	Attribute(String),
}

impl ActorField {
	/// Parses the part of a reference after `$actor.`.
	pub fn parse(reference: &str) -> Option<Self> {
		match reference {
			"userId" => Some(ActorField::UserId),
			"organizationId" => Some(ActorField::OrganizationId),
			"roles" => Some(ActorField::Roles),
			other => other
				.strip_prefix("attributes.")
				.filter(|path| !path.is_empty())
				.map(|path| ActorField::Attribute(path.to_string())),
		}
	}

	/// Resolves this field for `actor`. A missing attribute resolves to null.
	pub fn resolve(&self, actor: &Actor) -> Value {
		match self {
			ActorField::UserId => Value::String(actor.user_id.to_string()),
			ActorField::OrganizationId => Value::String(actor.organization_id.to_string()),
			ActorField::Roles => Value::Array(actor.roles.iter().cloned().map(Value::String).collect()),
			ActorField::Attribute(path) => lookup_path(&actor.attributes, path)
				.cloned()
				.unwrap_or(Value::Null),
		}
	}
}

impl fmt::Display for ActorField {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ActorField::UserId => write!(f, "{ACTOR_PREFIX}userId"),
			ActorField::OrganizationId => write!(f, "{ACTOR_PREFIX}organizationId"),
			ActorField::Roles => write!(f, "{ACTOR_PREFIX}roles"),
			ActorField::Attribute(path) => write!(f, "{ACTOR_PREFIX}attributes.{path}"),
		}
	}
}

/// The right-hand side of a scope rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScopeValue {
	/// A constant, kept exactly as stored.
	Literal(String),
	Actor(ActorField),
}

impl ScopeValue {
	/// Parses a stored value.
	///
	/// `$actor.*` references naming a known field become
	/// [`ScopeValue::Actor`]. Everything else is a literal string.
	pub fn parse(raw: &str) -> Self {
		match raw.strip_prefix(ACTOR_PREFIX).and_then(ActorField::parse) {
			Some(field) => ScopeValue::Actor(field),
			None => ScopeValue::Literal(raw.to_string()),
		}
	}

	/// Shorthand for a string literal.
	pub fn string(value: impl Into<String>) -> Self {
		ScopeValue::Literal(value.into())
	}

	pub fn resolve(&self, actor: &Actor) -> Value {
		match self {
			ScopeValue::Literal(value) => Value::String(value.clone()),
			ScopeValue::Actor(field) => field.resolve(actor),
		}
	}

	/// Returns true for the empty literal.
	pub fn is_empty(&self) -> bool {
		matches!(self, ScopeValue::Literal(s) if s.is_empty())
	}

	/// The stored form.
	///
	/// [`ScopeValue::parse`] reads it back to an equal value, except for a
	/// literal spelling a known actor reference, which reads back as that
	/// reference.
	pub fn to_raw(&self) -> String {
		match self {
			ScopeValue::Actor(field) => field.to_string(),
			ScopeValue::Literal(value) => value.clone(),
		}
	}
}

impl From<String> for ScopeValue {
	fn from(raw: String) -> Self {
		ScopeValue::parse(&raw)
	}
}

impl From<ScopeValue> for String {
	fn from(value: ScopeValue) -> Self {
		value.to_raw()
	}
}

// =============================================================================
// Scope Rules
// =============================================================================

/// What a scope rule checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScopeCondition {
	/// Compare a resource field with an operator.
	Field {
		field: String,
		operator: Operator,
		value: ScopeValue,
	},
	/// Require a related entity's identifier to equal a value, by default the actor's id.
	Relation {
		relation_path: String,
		value: Option<ScopeValue>,
	},
	/// A stored rule that could not be interpreted. Never matches.
	Malformed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeRule {
	pub id: ScopeRuleId,
	pub policy_id: PolicyId,
	pub condition: ScopeCondition,
}

impl ScopeRule {
	pub fn field(
		policy_id: PolicyId,
		field: impl Into<String>,
		operator: Operator,
		value: ScopeValue,
	) -> Self {
		Self {
			id: ScopeRuleId::generate(),
			policy_id,
			condition: ScopeCondition::Field {
				field: field.into(),
				operator,
				value,
			},
		}
	}

	pub fn relation(
		policy_id: PolicyId,
		relation_path: impl Into<String>,
		value: Option<ScopeValue>,
	) -> Self {
		Self {
			id: ScopeRuleId::generate(),
			policy_id,
			condition: ScopeCondition::Relation {
				relation_path: relation_path.into(),
				value,
			},
		}
	}

	/// Builds a rule from its stored columns.
	///
	/// Inconsistent rows (a field rule without a field, an unknown operator,
	/// a relation rule without a path) become [`ScopeCondition::Malformed`].
	pub fn from_record(
		id: ScopeRuleId,
		policy_id: PolicyId,
		rule_type: &str,
		field: Option<&str>,
		operator: Option<&str>,
		value: Option<&str>,
		relation_path: Option<&str>,
	) -> Self {
		let condition = match rule_type {
			"field" => match (field.filter(|f| !f.is_empty()), operator) {
				(Some(field), Some(operator)) => match operator.parse::<Operator>() {
					Ok(operator) => ScopeCondition::Field {
						field: field.to_string(),
						operator,
						value: ScopeValue::parse(value.unwrap_or_default()),
					},
					Err(err) => ScopeCondition::Malformed {
						reason: err.to_string(),
					},
				},
				(None, _) => ScopeCondition::Malformed {
					reason: "field rule without a field".to_string(),
				},
				(_, None) => ScopeCondition::Malformed {
					reason: "field rule without an operator".to_string(),
				},
			},
			"relation" => match relation_path.filter(|p| !p.is_empty()) {
				Some(path) => ScopeCondition::Relation {
					relation_path: path.to_string(),
					value: value.filter(|v| !v.is_empty()).map(ScopeValue::parse),
				},
				None => ScopeCondition::Malformed {
					reason: "relation rule without a relation path".to_string(),
				},
			},
			other => ScopeCondition::Malformed {
				reason: format!("unknown scope rule type: '{other}'"),
			},
		};

		if let ScopeCondition::Malformed { reason } = &condition {
			tracing::warn!(scope_rule_id = %id, policy_id = %policy_id, %reason, "malformed scope rule");
		}

		Self {
			id,
			policy_id,
			condition,
		}
	}
}

/// A matched scope rule in query-ready form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeFilter {
	pub field: String,
	pub operator: Operator,
	pub value: Value,
}

impl ScopeFilter {
	pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
		Self {
			field: field.into(),
			operator,
			value,
		}
	}

	/// Identity used for deduplication. Values equal under [`json_eq`] share a key.
	pub(crate) fn dedup_key(&self) -> (String, Operator, String) {
		(self.field.clone(), self.operator, canonical(&self.value).to_string())
	}
}

/// Rewrites integral floats as integers, so `1.0` and `1` serialize alike.
fn canonical(value: &Value) -> Value {
	match value {
		Value::Number(n) if n.is_f64() => match n.as_f64() {
			Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
				Value::from(f as i64)
			}
			_ => value.clone(),
		},
		Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
		Value::Object(map) => Value::Object(
			map.iter()
				.map(|(key, item)| (key.clone(), canonical(item)))
				.collect(),
		),
		_ => value.clone(),
	}
}
