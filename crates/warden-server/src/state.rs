// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared application state.

use std::sync::Arc;

use sqlx::SqlitePool;
use warden_policy_core::{FieldMasker, MaskingOptions};
use warden_server_auth::PolicyResolver;
use warden_server_config::{MaskingConfig, ServerConfig};
use warden_server_db::{create_pool, run_migrations, DbError, PolicyRepository};

use crate::abac_middleware::ResolvePermissions;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
	pub pool: SqlitePool,
	pub policy_repo: Arc<PolicyRepository>,
	pub resolver: PolicyResolver,
	pub masker: FieldMasker,
}

impl AppState {
	pub fn new(pool: SqlitePool, masking: &MaskingConfig) -> Self {
		let policy_repo = Arc::new(PolicyRepository::new(pool.clone()));
		let resolver = PolicyResolver::new(policy_repo.clone());
		Self {
			pool,
			policy_repo,
			resolver,
			masker: FieldMasker::new(masking_options(masking)),
		}
	}

	/// Opens the configured database, applies the schema and builds the state.
	pub async fn from_config(config: &ServerConfig) -> Result<Self, DbError> {
		let pool = create_pool(&config.database.url).await?;
		run_migrations(&pool).await?;
		tracing::info!(url = %config.database.url, "policy store ready");
		Ok(Self::new(pool, &config.masking))
	}

	/// The layer that resolves each request's permissions.
	pub fn permission_layer(&self) -> ResolvePermissions {
		ResolvePermissions::new(self.resolver.clone())
	}
}

pub fn masking_options(config: &MaskingConfig) -> MaskingOptions {
	MaskingOptions {
		placeholder: config.placeholder.clone(),
		max_stars: config.max_stars,
		short_len: config.short_len,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use warden_policy_core::{FieldMask, PolicyId};
	use warden_server_db::testing::create_policy_test_pool;

	#[test]
	fn masking_options_follow_config() {
		let config = MaskingConfig {
			placeholder: "[redacted]".to_string(),
			max_stars: 3,
			short_len: 2,
		};
		let options = masking_options(&config);
		assert_eq!(options.placeholder, "[redacted]");
		assert_eq!(options.max_stars, 3);
		assert_eq!(options.short_len, 2);
	}

	#[tokio::test]
	async fn state_masker_uses_configured_placeholder() {
		let pool = create_policy_test_pool().await;
		let config = MaskingConfig {
			placeholder: "[redacted]".to_string(),
			..MaskingConfig::default()
		};
		let state = AppState::new(pool, &config);

		let mask = FieldMask::redact(PolicyId::generate(), "pin", Default::default());
		let masked = state.masker.mask(&json!({ "pin": "12" }), &[mask]);
		assert_eq!(masked, json!({ "pin": "[redacted]" }));
	}
}
