// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracing subscriber setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use warden_server_config::{LogFormat, LoggingConfig};

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the configured level. Fails if a global subscriber
/// is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
	let filter = env_filter(config);
	let fmt_layer = match config.format {
		LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
		LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
	};

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt_layer)
		.try_init()
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
	EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}
