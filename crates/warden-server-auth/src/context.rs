// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-request decision state.

use serde_json::{Map, Value};
use warden_policy_core::{Action, Actor, PermissionEvaluator, PermissionResult};

use crate::error::AuthzError;

/// The actor and its resolved policies for one request.
///
/// Built once by the resolver and shared by every check the request makes.
#[derive(Debug, Clone)]
pub struct PermissionContext {
	actor: Actor,
	evaluator: PermissionEvaluator,
}

impl PermissionContext {
	pub fn new(actor: Actor, evaluator: PermissionEvaluator) -> Self {
		Self { actor, evaluator }
	}

	pub fn actor(&self) -> &Actor {
		&self.actor
	}

	pub fn evaluator(&self) -> &PermissionEvaluator {
		&self.evaluator
	}

	pub fn evaluate(
		&self,
		resource: &str,
		action: Action,
		resource_data: Option<&Map<String, Value>>,
	) -> PermissionResult {
		self.evaluator
			.evaluate(&self.actor, resource, action, resource_data)
	}

	/// Evaluates and converts a denial into [`AuthzError::AuthorizationDenied`].
	pub fn require(
		&self,
		resource: &str,
		action: Action,
		resource_data: Option<&Map<String, Value>>,
	) -> Result<PermissionResult, AuthzError> {
		let result = self.evaluate(resource, action, resource_data);
		if result.allowed {
			Ok(result)
		} else {
			tracing::debug!(user_id = %self.actor.user_id, resource, %action, reason = %result.reason, "permission required but denied");
			Err(AuthzError::AuthorizationDenied {
				reason: result.reason,
			})
		}
	}

	/// Like [`require`](Self::require) against one record.
	///
	/// A record that is not a JSON object is checked without data.
	pub fn require_record(
		&self,
		resource: &str,
		action: Action,
		record: &Value,
	) -> Result<PermissionResult, AuthzError> {
		self.require(resource, action, record.as_object())
	}

	/// Returns true if the action is allowed, ignoring restrictions.
	pub fn can(&self, resource: &str, action: Action) -> bool {
		self.evaluate(resource, action, None).allowed
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use warden_policy_core::{
		Effect, OrgId, Operator, Policy, PolicyId, ResolvedPolicy, ResourcePattern, RoleId, ScopeRule,
		ScopeValue, UserId,
	};

	fn context_with(policies: Vec<ResolvedPolicy>) -> PermissionContext {
		let actor = Actor::new(UserId::generate(), OrgId::generate()).with_roles(["viewer"]);
		PermissionContext::new(actor, PermissionEvaluator::new(policies))
	}

	fn invoice_read(org_id: OrgId) -> ResolvedPolicy {
		let policy = Policy {
			id: PolicyId::generate(),
			organization_id: org_id,
			role_id: RoleId::generate(),
			resource: ResourcePattern::from("invoice"),
			action: Action::Read.into(),
			effect: Effect::Allow,
			priority: 0,
		};
		let rule = ScopeRule::field(policy.id, "status", Operator::Eq, ScopeValue::string("open"));
		ResolvedPolicy::new(policy).with_scope_rule(rule)
	}

	#[test]
	fn require_returns_result_on_allow() {
		let context = context_with(vec![invoice_read(OrgId::generate())]);
		let result = context.require("invoice", Action::Read, None).unwrap();
		assert!(result.allowed);
		assert_eq!(result.scope_filters.len(), 1);
	}

	#[test]
	fn require_maps_denial_to_error() {
		let context = context_with(vec![invoice_read(OrgId::generate())]);
		let err = context.require("invoice", Action::Delete, None).unwrap_err();
		match err {
			AuthzError::AuthorizationDenied { reason } => {
				assert_eq!(
					reason,
					"no policies found for resource 'invoice' and action 'delete'"
				);
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn require_record_checks_the_record() {
		let context = context_with(vec![invoice_read(OrgId::generate())]);

		let open = json!({ "status": "open" });
		let result = context.require_record("invoice", Action::Read, &open).unwrap();
		assert_eq!(result.scope_filters.len(), 1);

		let closed = json!({ "status": "closed" });
		let result = context.require_record("invoice", Action::Read, &closed).unwrap();
		assert!(result.scope_filters.is_empty());
	}

	#[test]
	fn can_reports_allow_only() {
		let context = context_with(vec![invoice_read(OrgId::generate())]);
		assert!(context.can("invoice", Action::Read));
		assert!(!context.can("invoice", Action::Update));
		assert!(!context_with(Vec::new()).can("invoice", Action::Read));
	}
}
