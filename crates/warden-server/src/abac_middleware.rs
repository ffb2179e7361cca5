// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! ABAC (Attribute-Based Access Control) middleware.
//!
//! Authorization runs in two tiers:
//!
//! 1. **Resolution** ([`ResolvePermissions`]): once per request, turns the
//!    [`Identity`] established by authentication into a [`PermissionContext`]
//! 2. **Checks**: either route-level ([`RequirePermission`], no resource data)
//!    or handler-level through the [`Permissions`] extractor, which can pass
//!    the loaded record to the evaluator
//!
//! # Responses
//!
//! - No identity or no context: 401 Unauthorized
//! - Denied: 403 Forbidden with the evaluator's reason
//! - Policy storage failure: 500, details logged only
//!
//! # Example
//!
//! ```ignore
//! use warden_server::abac_middleware::{RequirePermission, ResolvePermissions};
//! use warden_policy_core::Action;
//!
//! Router::new()
//!     .route(
//!         "/invoices",
//!         get(list_invoices).route_layer(RequirePermission::new("invoice", Action::List)),
//!     )
//!     .layer(ResolvePermissions::new(resolver));
//! ```

use axum::{
	body::Body,
	extract::FromRequestParts,
	http::{request::Parts, Request},
	response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::future::BoxFuture;
use pin_project_lite::pin_project;
use serde_json::Value;
use std::{
	future::Future,
	pin::Pin,
	sync::Arc,
	task::{Context, Poll},
};
use tower::{Layer, Service};
use warden_policy_core::{Action, FieldMask, FieldMasker, PermissionResult, ScopeFilter};
use warden_server_auth::{Identity, PermissionContext, PolicyResolver};

use crate::api_response::{
	forbidden_response, internal_error_response, unauthorized_response, ApiError,
};

// =============================================================================
// Resolution Layer
// =============================================================================

/// Layer that resolves the caller's permissions once per request.
///
/// Reads [`Identity`] from the request extensions and inserts an
/// `Arc<PermissionContext>`. Requests without an identity pass through
/// unresolved; later checks reject them with 401.
#[derive(Clone)]
pub struct ResolvePermissions {
	resolver: PolicyResolver,
}

impl ResolvePermissions {
	pub fn new(resolver: PolicyResolver) -> Self {
		Self { resolver }
	}
}

impl<S> Layer<S> for ResolvePermissions {
	type Service = ResolvePermissionsService<S>;

	fn layer(&self, inner: S) -> Self::Service {
		ResolvePermissionsService {
			inner,
			resolver: self.resolver.clone(),
		}
	}
}

/// Service wrapper for [`ResolvePermissions`] layer.
#[derive(Clone)]
pub struct ResolvePermissionsService<S> {
	inner: S,
	resolver: PolicyResolver,
}

impl<S> Service<Request<Body>> for ResolvePermissionsService<S>
where
	S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
	S::Future: Send,
{
	type Response = Response;
	type Error = S::Error;
	type Future = BoxFuture<'static, Result<Response, S::Error>>;

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, mut req: Request<Body>) -> Self::Future {
		// The clone is not ready; keep the polled service for this request.
		let clone = self.inner.clone();
		let mut inner = std::mem::replace(&mut self.inner, clone);
		let resolver = self.resolver.clone();

		Box::pin(async move {
			let Some(identity) = req.extensions().get::<Identity>().cloned() else {
				tracing::trace!("no identity, skipping permission resolution");
				return inner.call(req).await;
			};

			match resolver.resolve_context(&identity, Utc::now()).await {
				Ok(context) => {
					req.extensions_mut().insert(Arc::new(context));
					inner.call(req).await
				}
				Err(err) => {
					tracing::error!(
						user_id = %identity.user_id,
						org_id = %identity.organization_id,
						error = %err,
						"permission resolution failed"
					);
					Ok(ApiError::from(err).into_response())
				}
			}
		})
	}
}

// =============================================================================
// Route-Level Check
// =============================================================================

/// Route layer that requires permission for an action on a resource.
///
/// Evaluates without resource data, so scope rules only produce filters.
/// On success a [`Permitted`] is inserted for the handler.
///
/// # Example
///
/// ```ignore
/// Router::new()
///     .route("/invoices", get(list_invoices))
///     .route_layer(RequirePermission::new("invoice", Action::List))
/// ```
#[derive(Clone)]
pub struct RequirePermission {
	resource: Arc<str>,
	action: Action,
}

impl RequirePermission {
	pub fn new(resource: impl Into<Arc<str>>, action: Action) -> Self {
		Self {
			resource: resource.into(),
			action,
		}
	}
}

impl<S> Layer<S> for RequirePermission {
	type Service = RequirePermissionService<S>;

	fn layer(&self, inner: S) -> Self::Service {
		RequirePermissionService {
			inner,
			resource: Arc::clone(&self.resource),
			action: self.action,
		}
	}
}

/// Service wrapper for [`RequirePermission`] layer.
#[derive(Clone)]
pub struct RequirePermissionService<S> {
	inner: S,
	resource: Arc<str>,
	action: Action,
}

impl<S> Service<Request<Body>> for RequirePermissionService<S>
where
	S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
	S::Future: Send,
{
	type Response = Response;
	type Error = S::Error;
	type Future = RequirePermissionFuture<S::Future>;

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, mut req: Request<Body>) -> Self::Future {
		let Some(context) = req.extensions().get::<Arc<PermissionContext>>().cloned() else {
			tracing::debug!(
				resource = %self.resource,
				action = %self.action,
				"permission denied: not authenticated"
			);
			return RequirePermissionFuture::Rejected {
				resp: Some(unauthorized_response()),
			};
		};

		let result = context.evaluate(&self.resource, self.action, None);
		if !result.allowed {
			tracing::info!(
				user_id = %context.actor().user_id,
				resource = %self.resource,
				action = %self.action,
				reason = %result.reason,
				"permission denied"
			);
			return RequirePermissionFuture::Rejected {
				resp: Some(forbidden_response(result.reason)),
			};
		}

		tracing::debug!(
			user_id = %context.actor().user_id,
			resource = %self.resource,
			action = %self.action,
			filters = result.scope_filters.len(),
			masks = result.field_masks.len(),
			"permission granted"
		);
		req.extensions_mut().insert(Permitted(Arc::new(result)));

		RequirePermissionFuture::Inner {
			fut: self.inner.call(req),
		}
	}
}

pin_project! {
	/// Future for [`RequirePermissionService`].
	#[project = RequirePermissionFutureProj]
	pub enum RequirePermissionFuture<F> {
		Inner { #[pin] fut: F },
		Rejected { resp: Option<Response> },
	}
}

impl<F, E> Future for RequirePermissionFuture<F>
where
	F: Future<Output = Result<Response, E>>,
{
	type Output = Result<Response, E>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match self.project() {
			RequirePermissionFutureProj::Inner { fut } => fut.poll(cx),
			RequirePermissionFutureProj::Rejected { resp } => Poll::Ready(Ok(resp
				.take()
				.unwrap_or_else(|| internal_error_response("Response already taken")))),
		}
	}
}

// =============================================================================
// Extractors
// =============================================================================

/// The granted decision for a route guarded by [`RequirePermission`].
///
/// Apply [`scope_filters`](Self::scope_filters) to the storage query and mask
/// the response before returning it.
#[derive(Debug, Clone)]
pub struct Permitted(pub Arc<PermissionResult>);

impl Permitted {
	pub fn result(&self) -> &PermissionResult {
		&self.0
	}

	pub fn scope_filters(&self) -> &[ScopeFilter] {
		&self.0.scope_filters
	}

	pub fn field_masks(&self) -> &[FieldMask] {
		&self.0.field_masks
	}

	/// Masks one record with the default masking options.
	pub fn mask(&self, data: &Value) -> Value {
		self.mask_with(&FieldMasker::default(), data)
	}

	/// Masks each record with the default masking options.
	pub fn mask_array(&self, data: &[Value]) -> Vec<Value> {
		FieldMasker::default().mask_array(data, &self.0.field_masks)
	}

	pub fn mask_with(&self, masker: &FieldMasker, data: &Value) -> Value {
		masker.mask(data, &self.0.field_masks)
	}
}

impl<S> FromRequestParts<S> for Permitted
where
	S: Send + Sync,
{
	type Rejection = Response;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		parts.extensions.get::<Permitted>().cloned().ok_or_else(|| {
			tracing::error!(
				path = %parts.uri.path(),
				"Permitted extracted on a route without RequirePermission"
			);
			internal_error_response("Permission check not configured for this route")
		})
	}
}

/// The request's resolved [`PermissionContext`], for handler-level checks
/// against loaded records.
#[derive(Debug, Clone)]
pub struct Permissions(pub Arc<PermissionContext>);

impl std::ops::Deref for Permissions {
	type Target = PermissionContext;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl<S> FromRequestParts<S> for Permissions
where
	S: Send + Sync,
{
	type Rejection = Response;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		parts
			.extensions
			.get::<Arc<PermissionContext>>()
			.cloned()
			.map(Permissions)
			.ok_or_else(unauthorized_response)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::StatusCode;
	use serde_json::json;
	use std::convert::Infallible;
	use tower::ServiceExt;
	use warden_policy_core::{
		Actor, Effect, OrgId, PermissionEvaluator, Policy, PolicyId, ResolvedPolicy,
		ResourcePattern, RoleId, UserId,
	};

	fn context(effect: Effect) -> Arc<PermissionContext> {
		let policy = Policy {
			id: PolicyId::generate(),
			organization_id: OrgId::generate(),
			role_id: RoleId::generate(),
			resource: ResourcePattern::from("invoice"),
			action: Action::Read.into(),
			effect,
			priority: 0,
		};
		let mask = FieldMask::hide(policy.id, "ssn");
		let resolved = ResolvedPolicy::new(policy).with_field_mask(mask);
		let actor = Actor::new(UserId::generate(), OrgId::generate());
		Arc::new(PermissionContext::new(actor, PermissionEvaluator::new(vec![resolved])))
	}

	async fn call_guarded(req: Request<Body>) -> Response {
		let handler = tower::service_fn(|req: Request<Body>| async move {
			let masks = req
				.extensions()
				.get::<Permitted>()
				.map(|p| p.field_masks().len())
				.unwrap_or_default();
			Ok::<_, Infallible>((StatusCode::OK, masks.to_string()).into_response())
		});
		RequirePermission::new("invoice", Action::Read)
			.layer(handler)
			.oneshot(req)
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn missing_context_is_unauthorized() {
		let response = call_guarded(Request::new(Body::empty())).await;
		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn denied_is_forbidden() {
		let mut req = Request::new(Body::empty());
		req.extensions_mut().insert(context(Effect::Deny));

		let response = call_guarded(req).await;
		assert_eq!(response.status(), StatusCode::FORBIDDEN);
	}

	#[tokio::test]
	async fn allowed_inserts_permitted() {
		let mut req = Request::new(Body::empty());
		req.extensions_mut().insert(context(Effect::Allow));

		let response = call_guarded(req).await;
		assert_eq!(response.status(), StatusCode::OK);
		let body = axum::body::to_bytes(response.into_body(), usize::MAX)
			.await
			.unwrap();
		assert_eq!(&body[..], b"1");
	}

	#[test]
	fn permitted_masks_with_granted_masks() {
		let result = PermissionResult::granted(
			Vec::new(),
			vec![FieldMask::hide(PolicyId::generate(), "ssn")],
		);
		let permitted = Permitted(Arc::new(result));

		let record = json!({ "id": 1, "ssn": "123-45-6789" });
		assert_eq!(permitted.mask(&record), json!({ "id": 1 }));
		assert_eq!(
			permitted.mask_array(&[record.clone(), record]),
			vec![json!({ "id": 1 }), json!({ "id": 1 })]
		);
	}
}
