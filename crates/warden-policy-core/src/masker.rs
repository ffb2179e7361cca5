// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Post-decision redaction of response payloads.
//!
//! [`FieldMasker`] applies the [`FieldMask`]s of a granted decision to a copy
//! of the payload. The caller's value is never modified.

use serde_json::{Map, Value};

use crate::field_mask::{FieldMask, MaskType, Redaction};

pub const DEFAULT_PLACEHOLDER: &str = "***";
pub const DEFAULT_MAX_STARS: usize = 8;
pub const DEFAULT_SHORT_LEN: usize = 4;

/// Settings for the default partial redaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskingOptions {
	/// Replacement for short values and invalid patterns.
	pub placeholder: String,
	/// Upper bound on the stars between the kept first and last characters.
	pub max_stars: usize,
	/// Values of at most this many characters become the placeholder.
	pub short_len: usize,
}

impl Default for MaskingOptions {
	fn default() -> Self {
		Self {
			placeholder: DEFAULT_PLACEHOLDER.to_string(),
			max_stars: DEFAULT_MAX_STARS,
			short_len: DEFAULT_SHORT_LEN,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct FieldMasker {
	options: MaskingOptions,
}

impl FieldMasker {
	pub fn new(options: MaskingOptions) -> Self {
		Self { options }
	}

	pub fn options(&self) -> &MaskingOptions {
		&self.options
	}

	/// Returns a copy of `data` with every mask applied in order.
	pub fn mask(&self, data: &Value, masks: &[FieldMask]) -> Value {
		let mut masked = data.clone();
		for mask in masks {
			let segments: Vec<&str> = mask.field_path.split('.').collect();
			self.apply(&mut masked, &segments, mask);
		}
		masked
	}

	/// Masks each element independently.
	pub fn mask_array(&self, data: &[Value], masks: &[FieldMask]) -> Vec<Value> {
		data.iter().map(|item| self.mask(item, masks)).collect()
	}

	fn apply(&self, value: &mut Value, segments: &[&str], mask: &FieldMask) {
		match value {
			Value::Array(items) => {
				for item in items {
					self.apply(item, segments, mask);
				}
			}
			Value::Object(map) => {
				let Some((head, rest)) = segments.split_first() else {
					return;
				};
				if rest.is_empty() {
					self.apply_terminal(map, head, mask);
				} else if let Some(child) = map.get_mut(*head) {
					self.apply(child, rest, mask);
				}
			}
			_ => {}
		}
	}

	fn apply_terminal(&self, map: &mut Map<String, Value>, key: &str, mask: &FieldMask) {
		match mask.mask_type {
			MaskType::Hide => {
				map.remove(key);
			}
			MaskType::Redact => {
				if let Some(value) = map.get_mut(key) {
					if !value.is_null() {
						*value = Value::String(self.redact(value, mask));
					}
				}
			}
		}
	}

	/// The redacted form of one value under `mask`.
	pub fn redact(&self, value: &Value, mask: &FieldMask) -> String {
		let text = match value {
			Value::String(s) => s.clone(),
			other => other.to_string(),
		};

		match mask.redaction() {
			Redaction::Pattern { regex, replacement } => {
				regex.replace_all(&text, replacement.as_str()).into_owned()
			}
			Redaction::InvalidPattern(_) => self.options.placeholder.clone(),
			Redaction::Replace(replacement) => replacement.clone(),
			Redaction::Partial => self.partial(&text),
		}
	}

	/// Keeps the first and last character and stars out the rest.
	fn partial(&self, text: &str) -> String {
		let chars: Vec<char> = text.chars().collect();
		if chars.len() <= self.options.short_len.max(2) {
			return self.options.placeholder.clone();
		}

		let stars = (chars.len() - 2).min(self.options.max_stars);
		let mut out = String::with_capacity(stars + 8);
		out.push(chars[0]);
		out.extend(std::iter::repeat('*').take(stars));
		out.push(chars[chars.len() - 1]);
		out
	}
}

/// Masks `data` with the default options.
pub fn mask(data: &Value, masks: &[FieldMask]) -> Value {
	FieldMasker::default().mask(data, masks)
}

/// Masks each element of `data` with the default options.
pub fn mask_array(data: &[Value], masks: &[FieldMask]) -> Vec<Value> {
	FieldMasker::default().mask_array(data, masks)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::field_mask::MaskConfig;
	use crate::types::PolicyId;
	use proptest::prelude::*;
	use serde_json::json;

	fn hide(path: &str) -> FieldMask {
		FieldMask::hide(PolicyId::generate(), path)
	}

	fn redact(path: &str) -> FieldMask {
		FieldMask::redact(PolicyId::generate(), path, MaskConfig::default())
	}

	mod hide {
		use super::*;

		#[test]
		fn removes_top_level_key() {
			let data = json!({ "name": "Ada", "ssn": "123-45-6789" });
			let masked = mask(&data, &[hide("ssn")]);
			assert_eq!(masked, json!({ "name": "Ada" }));
		}

		#[test]
		fn removes_nested_key() {
			let data = json!({ "profile": { "email": "a@b.c", "name": "Ada" } });
			let masked = mask(&data, &[hide("profile.email")]);
			assert_eq!(masked, json!({ "profile": { "name": "Ada" } }));
		}

		#[test]
		fn absent_path_is_a_no_op() {
			let data = json!({ "profile": { "name": "Ada" }, "count": 3 });
			let masked = mask(
				&data,
				&[hide("missing"), hide("profile.missing.deeper"), hide("count.value")],
			);
			assert_eq!(masked, data);
		}
	}

	mod redact {
		use super::*;

		#[test]
		fn default_partial_mask() {
			let data = json!({ "token": "secret123" });
			let masked = mask(&data, &[redact("token")]);
			assert_eq!(masked["token"], "s*******3");
		}

		#[test]
		fn partial_mask_caps_stars() {
			let masker = FieldMasker::default();
			let mask = redact("x");
			assert_eq!(masker.redact(&json!("abcdefghijklmnop"), &mask), "a********p");
			assert_eq!(masker.redact(&json!("abcde"), &mask), "a***e");
		}

		#[test]
		fn short_values_become_placeholder() {
			let masker = FieldMasker::default();
			let mask = redact("x");
			assert_eq!(masker.redact(&json!("abcd"), &mask), "***");
			assert_eq!(masker.redact(&json!(""), &mask), "***");
			assert_eq!(masker.redact(&json!(10), &mask), "***");
		}

		#[test]
		fn counts_characters_not_bytes() {
			let masker = FieldMasker::default();
			assert_eq!(masker.redact(&json!("ñandúes"), &redact("x")), "ñ*****s");
		}

		#[test]
		fn non_string_values_are_stringified() {
			let masker = FieldMasker::default();
			assert_eq!(masker.redact(&json!(1234567), &redact("x")), "1*****7");
		}

		#[test]
		fn null_and_missing_values_are_left_alone() {
			let data = json!({ "token": null });
			let masked = mask(&data, &[redact("token"), redact("other")]);
			assert_eq!(masked, json!({ "token": null }));
		}

		#[test]
		fn pattern_replacement_is_global() {
			let data = json!({ "phone": "555-123-4567" });
			let masks = [FieldMask::redact(
				PolicyId::generate(),
				"phone",
				MaskConfig::pattern("\\d", "#"),
			)];
			assert_eq!(mask(&data, &masks)["phone"], "###-###-####");
		}

		#[test]
		fn pattern_supports_capture_groups() {
			let data = json!({ "email": "ada@example.com" });
			let masks = [FieldMask::redact(
				PolicyId::generate(),
				"email",
				MaskConfig::pattern("^(.)[^@]*@", "$1***@"),
			)];
			assert_eq!(mask(&data, &masks)["email"], "a***@example.com");
		}

		#[test]
		fn group_reference_followed_by_letters_keeps_the_group() {
			let data = json!({ "phone": "5551234567" });
			let masks = [FieldMask::redact(
				PolicyId::generate(),
				"phone",
				MaskConfig::pattern("^(\\d{3})\\d+$", "$1xxx"),
			)];
			assert_eq!(mask(&data, &masks)["phone"], "555xxx");
		}

		#[test]
		fn invalid_pattern_falls_back_to_placeholder() {
			let data = json!({ "email": "ada@example.com" });
			let masks = [FieldMask::redact(
				PolicyId::generate(),
				"email",
				MaskConfig::pattern("([unclosed", "x"),
			)];
			assert_eq!(mask(&data, &masks)["email"], "***");
		}

		#[test]
		fn literal_replacement() {
			let data = json!({ "ssn": "123-45-6789" });
			let masks = [FieldMask::redact(
				PolicyId::generate(),
				"ssn",
				MaskConfig::replacement("[REDACTED]"),
			)];
			assert_eq!(mask(&data, &masks)["ssn"], "[REDACTED]");
		}

		#[test]
		fn custom_options() {
			let masker = FieldMasker::new(MaskingOptions {
				placeholder: "<hidden>".to_string(),
				max_stars: 3,
				short_len: 2,
			});
			let mask = redact("x");
			assert_eq!(masker.redact(&json!("abc"), &mask), "a*c");
			assert_eq!(masker.redact(&json!("abcdefgh"), &mask), "a***h");
			assert_eq!(masker.redact(&json!("ab"), &mask), "<hidden>");
		}
	}

	mod arrays {
		use super::*;

		#[test]
		fn fans_out_over_array_elements() {
			let data = json!({ "items": [{ "price": 10 }, { "price": 20 }] });
			let masked = mask(&data, &[redact("items.price")]);
			assert_eq!(masked, json!({ "items": [{ "price": "***" }, { "price": "***" }] }));
		}

		#[test]
		fn nested_arrays_fan_out_at_every_level() {
			let data = json!({
				"orders": [
					{ "lines": [{ "sku": "a", "cost": 1 }, { "sku": "b", "cost": 2 }] },
					{ "lines": [{ "sku": "c", "cost": 3 }] },
				]
			});
			let masked = mask(&data, &[hide("orders.lines.cost")]);
			assert_eq!(
				masked,
				json!({
					"orders": [
						{ "lines": [{ "sku": "a" }, { "sku": "b" }] },
						{ "lines": [{ "sku": "c" }] },
					]
				})
			);
		}

		#[test]
		fn mixed_array_elements_skip_primitives() {
			let data = json!({ "items": [{ "secret": "abcdefgh" }, 5, "text"] });
			let masked = mask(&data, &[redact("items.secret")]);
			assert_eq!(masked, json!({ "items": [{ "secret": "a******h" }, 5, "text"] }));
		}

		#[test]
		fn mask_array_applies_to_each_record() {
			let data = vec![json!({ "ssn": "1", "id": 1 }), json!({ "ssn": "2", "id": 2 })];
			let masked = mask_array(&data, &[hide("ssn")]);
			assert_eq!(masked, vec![json!({ "id": 1 }), json!({ "id": 2 })]);
		}
	}

	#[test]
	fn input_is_never_mutated() {
		let data = json!({ "ssn": "123-45-6789", "items": [{ "price": 10 }] });
		let snapshot = data.clone();
		let _ = mask(&data, &[hide("ssn"), redact("items.price")]);
		assert_eq!(data, snapshot);
	}

	proptest! {
		#[test]
		fn partial_mask_shape(text in "[a-zA-Z0-9]{5,40}") {
			let masked = FieldMasker::default().redact(&Value::String(text.clone()), &redact("x"));
			let chars: Vec<char> = text.chars().collect();
			let expected_stars = (chars.len() - 2).min(DEFAULT_MAX_STARS);
			prop_assert_eq!(masked.chars().count(), expected_stars + 2);
			prop_assert!(masked.starts_with(chars[0]));
			prop_assert!(masked.ends_with(chars[chars.len() - 1]));
		}

		#[test]
		fn masking_never_changes_the_input(
			keys in proptest::collection::vec("[a-c]{1,2}", 1..6),
			path in "[a-c]{1,2}(\\.[a-c]{1,2}){0,2}",
		) {
			let mut map = Map::new();
			for (i, key) in keys.iter().enumerate() {
				map.insert(key.clone(), json!({ "a": i, "b": [{ "c": "value" }] }));
			}
			let data = Value::Object(map);
			let snapshot = data.clone();
			let _ = mask(&data, &[hide(&path), redact(&path)]);
			prop_assert_eq!(data, snapshot);
		}
	}
}
