// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The partial configuration produced by each source.

use serde::Deserialize;

use crate::sections::{DatabaseConfigLayer, LoggingConfigLayer, MaskingConfigLayer};

/// One source's view of the configuration. Unset sections stay `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub masking: Option<MaskingConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl ServerConfigLayer {
	/// Overlay `other` on top of `self`; values set in `other` win.
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.masking, other.masking, MaskingConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_section<T>(current: &mut Option<T>, other: Option<T>, merge: impl FnOnce(&mut T, T)) {
	let Some(other) = other else {
		return;
	};
	if let Some(existing) = current.as_mut() {
		merge(existing, other);
	} else {
		*current = Some(other);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn later_layer_overrides_field_by_field() {
		let mut base: ServerConfigLayer = toml::from_str(
			r#"
			[masking]
			placeholder = "[hidden]"
			max_stars = 4
			"#,
		)
		.unwrap();
		let overlay: ServerConfigLayer = toml::from_str(
			r#"
			[masking]
			max_stars = 6

			[database]
			url = "sqlite::memory:"
			"#,
		)
		.unwrap();

		base.merge(overlay);

		let masking = base.masking.unwrap();
		assert_eq!(masking.placeholder.as_deref(), Some("[hidden]"));
		assert_eq!(masking.max_stars, Some(6));
		assert_eq!(base.database.unwrap().url.as_deref(), Some("sqlite::memory:"));
		assert!(base.logging.is_none());
	}
}
