// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Field masking configuration section.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MaskingConfigLayer {
	pub placeholder: Option<String>,
	pub max_stars: Option<usize>,
	pub short_len: Option<usize>,
}

impl MaskingConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.placeholder.is_some() {
			self.placeholder = other.placeholder;
		}
		if other.max_stars.is_some() {
			self.max_stars = other.max_stars;
		}
		if other.short_len.is_some() {
			self.short_len = other.short_len;
		}
	}

	pub fn finalize(self) -> MaskingConfig {
		let defaults = MaskingConfig::default();
		MaskingConfig {
			placeholder: self.placeholder.unwrap_or(defaults.placeholder),
			max_stars: self.max_stars.unwrap_or(defaults.max_stars),
			short_len: self.short_len.unwrap_or(defaults.short_len),
		}
	}
}

/// Settings for the default partial redaction of masked fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaskingConfig {
	/// Replacement for short values and invalid redaction patterns.
	pub placeholder: String,
	/// Maximum number of stars between the first and last character.
	pub max_stars: usize,
	/// Values of at most this many characters are fully replaced.
	pub short_len: usize,
}

impl Default for MaskingConfig {
	fn default() -> Self {
		Self {
			placeholder: "***".to_string(),
			max_stars: 8,
			short_len: 4,
		}
	}
}

impl MaskingConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.placeholder.is_empty() {
			return Err(ConfigError::Validation(
				"masking.placeholder must not be empty".to_string(),
			));
		}
		if self.max_stars == 0 {
			return Err(ConfigError::Validation(
				"masking.max_stars must be greater than 0".to_string(),
			));
		}
		Ok(())
	}
}
