// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database layer for Warden policy storage.
//!
//! [`PolicyStore`] is the read interface the resolver depends on;
//! [`PolicyRepository`] implements it over SQLite.

pub mod error;
pub mod migrations;
pub mod policy;
pub mod pool;
pub mod testing;

pub use error::{DbError, Result};
pub use migrations::run_migrations;
pub use policy::{PolicyRepository, PolicyStore};
pub use pool::create_pool;
