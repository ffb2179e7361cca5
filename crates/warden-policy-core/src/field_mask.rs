// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Field masks: column-level redaction attached to a policy.
//!
//! The redaction strategy is decided once, when the mask is built. A
//! configured regex is compiled at that point; an invalid pattern is kept as
//! a [`MaskConfigError`] and redacts to the placeholder instead of failing.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{FieldMaskId, PolicyId};

/// How a masked field is transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskType {
	/// Remove the field entirely.
	Hide,
	/// Replace the field's value with a redacted string.
	Redact,
}

impl std::fmt::Display for MaskType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			MaskType::Hide => write!(f, "hide"),
			MaskType::Redact => write!(f, "redact"),
		}
	}
}

impl std::str::FromStr for MaskType {
	type Err = crate::types::UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"hide" => Ok(MaskType::Hide),
			"redact" => Ok(MaskType::Redact),
			other => Err(crate::types::UnknownVariant {
				kind: "mask type",
				value: other.to_string(),
			}),
		}
	}
}

/// Optional redaction settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pattern: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub replacement: Option<String>,
}

impl MaskConfig {
	/// Regex replacement: every match of `pattern` becomes `replacement`.
	///
	/// `$N` and `${N}` insert capture group `N`, `${name}` a named group and
	/// `$$` a literal dollar. `$1abc` is group 1 followed by `abc`.
	pub fn pattern(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
		Self {
			pattern: Some(pattern.into()),
			replacement: Some(replacement.into()),
		}
	}

	/// Replace the whole value with a literal.
	pub fn replacement(replacement: impl Into<String>) -> Self {
		Self {
			pattern: None,
			replacement: Some(replacement.into()),
		}
	}
}

/// A redaction pattern that failed to compile.
///
/// Not fatal: the mask degrades to the placeholder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid redaction pattern '{pattern}': {message}")]
pub struct MaskConfigError {
	pub pattern: String,
	pub message: String,
}

#[derive(Debug, Clone)]
pub(crate) enum Redaction {
	Pattern { regex: Regex, replacement: String },
	InvalidPattern(MaskConfigError),
	Replace(String),
	Partial,
}

impl Redaction {
	fn from_config(config: &MaskConfig) -> Self {
		let pattern = config.pattern.as_deref().filter(|p| !p.is_empty());
		let replacement = config.replacement.as_deref().filter(|r| !r.is_empty());

		match (pattern, replacement) {
			(Some(pattern), Some(replacement)) => match Regex::new(pattern) {
				Ok(regex) => Redaction::Pattern {
					regex,
					replacement: brace_group_numbers(replacement),
				},
				Err(err) => Redaction::InvalidPattern(MaskConfigError {
					pattern: pattern.to_string(),
					message: err.to_string(),
				}),
			},
			(_, Some(replacement)) => Redaction::Replace(replacement.to_string()),
			_ => Redaction::Partial,
		}
	}
}

/// Rewrites `$N` as `${N}`. The regex crate reads `$1abc` as a group named
/// `1abc`, which never exists.
fn brace_group_numbers(replacement: &str) -> String {
	let mut out = String::with_capacity(replacement.len() + 4);
	let mut chars = replacement.chars().peekable();
	while let Some(c) = chars.next() {
		out.push(c);
		if c != '$' {
			continue;
		}
		match chars.peek() {
			Some(&'$') => {
				out.push('$');
				chars.next();
			}
			Some(d) if d.is_ascii_digit() => {
				out.push('{');
				while let Some(digit) = chars.next_if(char::is_ascii_digit) {
					out.push(digit);
				}
				out.push('}');
			}
			_ => {}
		}
	}
	out
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldMask {
	pub id: FieldMaskId,
	pub policy_id: PolicyId,
	/// Dotted path; arrays along the path are masked element-wise.
	pub field_path: String,
	pub mask_type: MaskType,
	pub config: MaskConfig,
	#[serde(skip)]
	redaction: Redaction,
}

impl FieldMask {
	pub fn new(
		id: FieldMaskId,
		policy_id: PolicyId,
		field_path: impl Into<String>,
		mask_type: MaskType,
		config: MaskConfig,
	) -> Self {
		let redaction = Redaction::from_config(&config);
		if let Redaction::InvalidPattern(err) = &redaction {
			tracing::warn!(field_mask_id = %id, policy_id = %policy_id, error = %err, "redaction pattern rejected, using placeholder");
		}

		Self {
			id,
			policy_id,
			field_path: field_path.into(),
			mask_type,
			config,
			redaction,
		}
	}

	/// A mask that removes `field_path`.
	pub fn hide(policy_id: PolicyId, field_path: impl Into<String>) -> Self {
		Self::new(
			FieldMaskId::generate(),
			policy_id,
			field_path,
			MaskType::Hide,
			MaskConfig::default(),
		)
	}

	/// A mask that redacts `field_path` according to `config`.
	pub fn redact(policy_id: PolicyId, field_path: impl Into<String>, config: MaskConfig) -> Self {
		Self::new(
			FieldMaskId::generate(),
			policy_id,
			field_path,
			MaskType::Redact,
			config,
		)
	}

	/// The configuration problem this mask degraded from, if any.
	pub fn config_error(&self) -> Option<&MaskConfigError> {
		match &self.redaction {
			Redaction::InvalidPattern(err) => Some(err),
			_ => None,
		}
	}

	pub(crate) fn redaction(&self) -> &Redaction {
		&self.redaction
	}

	pub(crate) fn dedup_key(&self) -> (String, MaskType) {
		(self.field_path.clone(), self.mask_type)
	}
}

impl PartialEq for FieldMask {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
			&& self.policy_id == other.policy_id
			&& self.field_path == other.field_path
			&& self.mask_type == other.mask_type
			&& self.config == other.config
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pattern_with_replacement_compiles() {
		let mask = FieldMask::redact(PolicyId::generate(), "email", MaskConfig::pattern("@.*$", "@***"));
		assert!(matches!(mask.redaction(), Redaction::Pattern { .. }));
		assert!(mask.config_error().is_none());
	}

	#[test]
	fn invalid_pattern_is_recorded() {
		let mask = FieldMask::redact(PolicyId::generate(), "email", MaskConfig::pattern("([a-z", "x"));
		let err = mask.config_error().expect("pattern should be rejected");
		assert_eq!(err.pattern, "([a-z");
	}

	#[test]
	fn numbered_groups_are_braced() {
		assert_eq!(brace_group_numbers("$1xxx"), "${1}xxx");
		assert_eq!(brace_group_numbers("$12-$3"), "${12}-${3}");
		assert_eq!(brace_group_numbers("${1}a $name"), "${1}a $name");
		assert_eq!(brace_group_numbers("$$1 costs $"), "$$1 costs $");
	}

	#[test]
	fn replacement_only() {
		let mask = FieldMask::redact(PolicyId::generate(), "ssn", MaskConfig::replacement("[hidden]"));
		assert!(matches!(mask.redaction(), Redaction::Replace(r) if r == "[hidden]"));
	}

	#[test]
	fn pattern_without_replacement_is_partial() {
		let config = MaskConfig {
			pattern: Some("\\d".to_string()),
			replacement: None,
		};
		let mask = FieldMask::redact(PolicyId::generate(), "phone", config);
		assert!(matches!(mask.redaction(), Redaction::Partial));
	}

	#[test]
	fn empty_settings_are_ignored() {
		let mask = FieldMask::redact(PolicyId::generate(), "phone", MaskConfig::pattern("", ""));
		assert!(matches!(mask.redaction(), Redaction::Partial));
	}

	#[test]
	fn mask_type_parse() {
		assert_eq!("hide".parse::<MaskType>().unwrap(), MaskType::Hide);
		assert!("blur".parse::<MaskType>().is_err());
	}

	#[test]
	fn serializes_without_compiled_state() {
		let mask = FieldMask::hide(PolicyId::generate(), "ssn");
		let json = serde_json::to_value(&mask).unwrap();
		assert_eq!(json["field_path"], "ssn");
		assert_eq!(json["mask_type"], "hide");
		assert!(json.get("redaction").is_none());
	}
}
