// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod database;
mod logging;
mod masking;

pub use database::{DatabaseConfig, DatabaseConfigLayer, DEFAULT_DATABASE_URL};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use masking::{MaskingConfig, MaskingConfigLayer};
