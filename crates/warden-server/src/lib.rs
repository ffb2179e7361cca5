// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP integration of Warden authorization.
//!
//! Authentication is upstream of this crate: it places an
//! [`Identity`](warden_server_auth::Identity) in the request extensions. From
//! there:
//!
//! ```text
//! Identity ──► ResolvePermissions ──► Arc<PermissionContext>
//!                                         │
//!                  ┌──────────────────────┴─────────────────────┐
//!                  ▼                                            ▼
//!          RequirePermission                           Permissions extractor
//!       (route level, no record)                  (handler level, loaded record)
//!                  │                                            │
//!                  ▼                                            ▼
//!      Permitted: filters + masks                  PermissionResult / 403
//! ```
//!
//! Handlers apply the scope filters to their queries and mask response
//! bodies with the granted field masks before returning them.

pub mod abac_middleware;
pub mod api_response;
pub mod state;
pub mod telemetry;

pub use abac_middleware::{Permissions, Permitted, RequirePermission, ResolvePermissions};
pub use api_response::{ApiError, ErrorResponse};
pub use state::{masking_options, AppState};
pub use telemetry::init_tracing;
