// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error response bodies for authorization failures.
//!
//! Every failure renders as `{"error": <code>, "message": <text>}`. Storage
//! details are logged, never returned.

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use serde::{Deserialize, Serialize};
use warden_server_auth::AuthzError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

impl ErrorResponse {
	pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			error: error.into(),
			message: message.into(),
		}
	}
}

/// An [`AuthzError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub AuthzError);

impl From<AuthzError> for ApiError {
	fn from(err: AuthzError) -> Self {
		Self(err)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.0.status_code();
		let message = match &self.0 {
			AuthzError::AuthenticationRequired => "Authentication required".to_string(),
			AuthzError::AuthorizationDenied { reason } => reason.clone(),
			AuthzError::Storage(err) => {
				tracing::error!(error = %err, "failed to load permissions");
				"Internal server error".to_string()
			}
		};
		(status, Json(ErrorResponse::new(self.0.code(), message))).into_response()
	}
}

pub(crate) fn unauthorized_response() -> Response {
	ApiError(AuthzError::AuthenticationRequired).into_response()
}

pub(crate) fn forbidden_response(reason: impl Into<String>) -> Response {
	ApiError(AuthzError::denied(reason)).into_response()
}

pub(crate) fn internal_error_response(message: impl Into<String>) -> Response {
	(
		StatusCode::INTERNAL_SERVER_ERROR,
		Json(ErrorResponse::new("internal_error", message)),
	)
		.into_response()
}

#[cfg(test)]
mod tests {
	use super::*;
	use warden_server_db::DbError;

	async fn body_of(response: Response) -> ErrorResponse {
		let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
			.await
			.unwrap();
		serde_json::from_slice(&bytes).unwrap()
	}

	#[tokio::test]
	async fn denial_exposes_reason() {
		let response = forbidden_response("no allow policies matched");
		assert_eq!(response.status(), StatusCode::FORBIDDEN);
		assert_eq!(
			body_of(response).await,
			ErrorResponse::new("forbidden", "no allow policies matched")
		);
	}

	#[tokio::test]
	async fn storage_failure_hides_details() {
		let err = AuthzError::from(DbError::Internal("Invalid policy effect: maybe".to_string()));
		let response = ApiError::from(err).into_response();
		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

		let body = body_of(response).await;
		assert_eq!(body.error, "internal_error");
		assert!(!body.message.contains("maybe"));
	}

	#[tokio::test]
	async fn unauthenticated() {
		let response = unauthorized_response();
		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
		assert_eq!(body_of(response).await.error, "unauthorized");
	}
}
