// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization for Warden requests.
//!
//! This crate provides:
//! - [`Identity`] - the authenticated caller, established upstream
//! - [`PolicyResolver`] - loads an identity's roles and policies
//! - [`PermissionContext`] - the per-request actor and evaluator
//! - [`AuthzError`] - authentication, authorization and storage failures
//!
//! # Authorization Flow
//!
//! ```text
//! Identity → PolicyResolver::resolve → ResolvedPermissions
//!                                            │
//!                                            └── into_context → PermissionContext
//!                                                                   │
//!                                                    require(resource, action, data)
//! ```

pub mod context;
pub mod error;
pub mod identity;
pub mod resolver;

pub use context::PermissionContext;
pub use error::AuthzError;
pub use identity::Identity;
pub use resolver::{PolicyResolver, ResolvedPermissions};
