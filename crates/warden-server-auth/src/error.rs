// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use http::StatusCode;
use warden_server_db::DbError;

/// Failures surfaced while deciding a request.
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
	/// No identity was established for the request.
	#[error("authentication required")]
	AuthenticationRequired,

	/// The evaluator refused the request.
	#[error("forbidden: {reason}")]
	AuthorizationDenied { reason: String },

	/// Loading the actor's policies failed.
	#[error(transparent)]
	Storage(#[from] DbError),
}

impl AuthzError {
	pub fn denied(reason: impl Into<String>) -> Self {
		Self::AuthorizationDenied {
			reason: reason.into(),
		}
	}

	pub fn status_code(&self) -> StatusCode {
		match self {
			AuthzError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
			AuthzError::AuthorizationDenied { .. } => StatusCode::FORBIDDEN,
			AuthzError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// Stable machine-readable code for response bodies.
	pub fn code(&self) -> &'static str {
		match self {
			AuthzError::AuthenticationRequired => "unauthorized",
			AuthzError::AuthorizationDenied { .. } => "forbidden",
			AuthzError::Storage(_) => "internal_error",
		}
	}
}
