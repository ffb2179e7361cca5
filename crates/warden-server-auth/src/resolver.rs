// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy resolution.
//!
//! Turns an authenticated [`Identity`] into the actor's role names and the
//! fully loaded policies of its organization:
//!
//! ```text
//! Identity → active role assignments → policies of those roles
//!                                          │
//!                                          ├── scope rules ─┐ (concurrent)
//!                                          └── field masks ─┘
//!                                                   ↓
//!                                        ResolvedPermissions
//! ```
//!
//! Resolution is read-only and runs once per request.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;
use warden_policy_core::{
	FieldMask, PermissionEvaluator, PolicyId, ResolvedPolicy, RoleId, ScopeRule,
};
use warden_server_db::PolicyStore;

use crate::context::PermissionContext;
use crate::error::AuthzError;
use crate::identity::Identity;

/// An actor's role names and resolved policies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPermissions {
	/// Names of the active roles, each listed once.
	pub roles: Vec<String>,
	pub policies: Vec<ResolvedPolicy>,
}

impl ResolvedPermissions {
	/// Builds the per-request context for `identity`.
	pub fn into_context(self, identity: &Identity) -> PermissionContext {
		let actor = identity.to_actor(self.roles);
		PermissionContext::new(actor, PermissionEvaluator::new(self.policies))
	}
}

/// Loads decision sets from a [`PolicyStore`].
#[derive(Clone)]
pub struct PolicyResolver {
	store: Arc<dyn PolicyStore>,
}

impl PolicyResolver {
	pub fn new(store: Arc<dyn PolicyStore>) -> Self {
		Self { store }
	}

	/// Resolves the identity's roles and policies as of `now`.
	///
	/// # Errors
	/// - [`AuthzError::AuthenticationRequired`] when `identity` is absent
	/// - [`AuthzError::Storage`] when a read fails
	#[instrument(
		skip_all,
		fields(user_id = tracing::field::Empty, org_id = tracing::field::Empty)
	)]
	pub async fn resolve(
		&self,
		identity: Option<&Identity>,
		now: DateTime<Utc>,
	) -> Result<ResolvedPermissions, AuthzError> {
		let identity = identity.ok_or(AuthzError::AuthenticationRequired)?;
		let span = tracing::Span::current();
		span.record("user_id", tracing::field::display(identity.user_id));
		span.record("org_id", tracing::field::display(identity.organization_id));

		let assignments = self
			.store
			.load_active_role_assignments(&identity.organization_id, &identity.user_id, now)
			.await?;
		if assignments.is_empty() {
			tracing::debug!("no active role assignments");
			return Ok(ResolvedPermissions::default());
		}

		let mut roles: Vec<String> = Vec::with_capacity(assignments.len());
		let mut role_ids: Vec<RoleId> = Vec::with_capacity(assignments.len());
		for assignment in assignments {
			if !role_ids.contains(&assignment.role.id) {
				role_ids.push(assignment.role.id);
			}
			if !roles.contains(&assignment.role.name) {
				roles.push(assignment.role.name);
			}
		}

		let policies = self
			.store
			.load_policies(&identity.organization_id, &role_ids)
			.await?;
		if policies.is_empty() {
			tracing::debug!(roles = roles.len(), "roles carry no policies");
			return Ok(ResolvedPermissions {
				roles,
				policies: Vec::new(),
			});
		}

		let policy_ids: Vec<PolicyId> = policies.iter().map(|p| p.id).collect();
		let (scope_rules, field_masks) = futures::try_join!(
			self.store.load_scope_rules(&policy_ids),
			self.store.load_field_masks(&policy_ids),
		)?;

		let mut rules_by_policy = group_by_policy(scope_rules, |rule: &ScopeRule| rule.policy_id);
		let mut masks_by_policy = group_by_policy(field_masks, |mask: &FieldMask| mask.policy_id);

		let mut seen = HashSet::with_capacity(policies.len());
		let policies: Vec<ResolvedPolicy> = policies
			.into_iter()
			.filter(|policy| seen.insert(policy.id))
			.map(|policy| ResolvedPolicy {
				scope_rules: rules_by_policy.remove(&policy.id).unwrap_or_default(),
				field_masks: masks_by_policy.remove(&policy.id).unwrap_or_default(),
				policy,
			})
			.collect();

		tracing::debug!(
			roles = roles.len(),
			policies = policies.len(),
			"resolved permissions"
		);
		Ok(ResolvedPermissions { roles, policies })
	}

	/// Resolves `identity` straight into a [`PermissionContext`].
	pub async fn resolve_context(
		&self,
		identity: &Identity,
		now: DateTime<Utc>,
	) -> Result<PermissionContext, AuthzError> {
		let resolved = self.resolve(Some(identity), now).await?;
		Ok(resolved.into_context(identity))
	}
}

fn group_by_policy<T>(items: Vec<T>, key: impl Fn(&T) -> PolicyId) -> HashMap<PolicyId, Vec<T>> {
	let mut grouped: HashMap<PolicyId, Vec<T>> = HashMap::new();
	for item in items {
		grouped.entry(key(&item)).or_default().push(item);
	}
	grouped
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use chrono::Duration;
	use serde_json::json;
	use warden_policy_core::{
		Action, Effect, MaskConfig, OrgId, Operator, Policy, RoleAssignment, ScopeValue, UserId,
	};
	use warden_server_db::testing::{
		create_policy_test_pool, seed_assignment, seed_policy, seed_role,
	};
	use warden_server_db::{DbError, PolicyRepository};

	async fn make_resolver() -> (PolicyResolver, PolicyRepository) {
		let repo = PolicyRepository::new(create_policy_test_pool().await);
		(PolicyResolver::new(Arc::new(repo.clone())), repo)
	}

	struct FailingStore;

	#[async_trait]
	impl PolicyStore for FailingStore {
		async fn load_active_role_assignments(
			&self,
			_org_id: &OrgId,
			_user_id: &UserId,
			_now: DateTime<Utc>,
		) -> Result<Vec<RoleAssignment>, DbError> {
			Err(DbError::Internal("connection reset".to_string()))
		}

		async fn load_policies(
			&self,
			_org_id: &OrgId,
			_role_ids: &[RoleId],
		) -> Result<Vec<Policy>, DbError> {
			Ok(Vec::new())
		}

		async fn load_scope_rules(&self, _policy_ids: &[PolicyId]) -> Result<Vec<ScopeRule>, DbError> {
			Ok(Vec::new())
		}

		async fn load_field_masks(&self, _policy_ids: &[PolicyId]) -> Result<Vec<FieldMask>, DbError> {
			Ok(Vec::new())
		}
	}

	mod failures {
		use super::*;

		#[tokio::test]
		async fn missing_identity_requires_authentication() {
			let (resolver, _) = make_resolver().await;
			let err = resolver.resolve(None, Utc::now()).await.unwrap_err();
			assert!(matches!(err, AuthzError::AuthenticationRequired));
		}

		#[tokio::test]
		async fn storage_errors_propagate_unchanged() {
			let resolver = PolicyResolver::new(Arc::new(FailingStore));
			let identity = Identity::new(UserId::generate(), OrgId::generate());

			let err = resolver.resolve(Some(&identity), Utc::now()).await.unwrap_err();
			assert!(matches!(err, AuthzError::Storage(DbError::Internal(ref msg)) if msg == "connection reset"));
		}
	}

	mod resolution {
		use super::*;

		#[tokio::test]
		async fn no_assignments_resolve_empty() {
			let (resolver, _) = make_resolver().await;
			let identity = Identity::new(UserId::generate(), OrgId::generate());

			let resolved = resolver.resolve(Some(&identity), Utc::now()).await.unwrap();
			assert_eq!(resolved, ResolvedPermissions::default());
		}

		#[tokio::test]
		async fn roles_without_policies_keep_role_names() {
			let (resolver, repo) = make_resolver().await;
			let identity = Identity::new(UserId::generate(), OrgId::generate());
			let role = seed_role(&repo, identity.organization_id, "guest").await;
			seed_assignment(&repo, identity.user_id, &role, None).await;

			let resolved = resolver.resolve(Some(&identity), Utc::now()).await.unwrap();
			assert_eq!(resolved.roles, vec!["guest".to_string()]);
			assert!(resolved.policies.is_empty());
		}

		#[tokio::test]
		async fn attaches_rules_and_masks_to_their_policies() {
			let (resolver, repo) = make_resolver().await;
			let identity = Identity::new(UserId::generate(), OrgId::generate());
			let role = seed_role(&repo, identity.organization_id, "accountant").await;
			seed_assignment(&repo, identity.user_id, &role, None).await;

			let read = seed_policy(&repo, &role, "invoice", "read", Effect::Allow, 10).await;
			let list = seed_policy(&repo, &role, "invoice", "list", Effect::Allow, 0).await;
			let owner = ScopeRule::relation(read.id, "ownerId", None);
			repo.create_scope_rule(&owner).await.unwrap();
			let ssn = FieldMask::hide(list.id, "ssn");
			repo.create_field_mask(&ssn).await.unwrap();

			let resolved = resolver.resolve(Some(&identity), Utc::now()).await.unwrap();

			assert_eq!(resolved.policies.len(), 2);
			assert_eq!(resolved.policies[0].policy, read);
			assert_eq!(resolved.policies[0].scope_rules, vec![owner]);
			assert!(resolved.policies[0].field_masks.is_empty());
			assert_eq!(resolved.policies[1].policy, list);
			assert!(resolved.policies[1].scope_rules.is_empty());
			assert_eq!(resolved.policies[1].field_masks, vec![ssn]);
		}

		#[tokio::test]
		async fn expired_assignments_grant_nothing() {
			let (resolver, repo) = make_resolver().await;
			let identity = Identity::new(UserId::generate(), OrgId::generate());
			let now = Utc::now();
			let role = seed_role(&repo, identity.organization_id, "temp").await;
			seed_assignment(&repo, identity.user_id, &role, Some(now - Duration::hours(1))).await;
			seed_policy(&repo, &role, "*", "*", Effect::Allow, 0).await;

			let resolved = resolver.resolve(Some(&identity), now).await.unwrap();
			assert!(resolved.roles.is_empty());
			assert!(resolved.policies.is_empty());
		}

		#[tokio::test]
		async fn duplicate_assignments_report_role_once() {
			let (resolver, repo) = make_resolver().await;
			let identity = Identity::new(UserId::generate(), OrgId::generate());
			let role = seed_role(&repo, identity.organization_id, "viewer").await;
			seed_assignment(&repo, identity.user_id, &role, None).await;
			seed_assignment(&repo, identity.user_id, &role, Some(Utc::now() + Duration::days(7))).await;
			seed_policy(&repo, &role, "invoice", "read", Effect::Allow, 0).await;

			let resolved = resolver.resolve(Some(&identity), Utc::now()).await.unwrap();
			assert_eq!(resolved.roles, vec!["viewer".to_string()]);
			assert_eq!(resolved.policies.len(), 1);
		}
	}

	#[tokio::test]
	async fn resolved_context_decides_invoice_read() {
		let (resolver, repo) = make_resolver().await;
		let identity = Identity::new(UserId::generate(), OrgId::generate())
			.with_attribute("limit", json!(1000));
		let role = seed_role(&repo, identity.organization_id, "clerk").await;
		seed_assignment(&repo, identity.user_id, &role, None).await;

		let read = seed_policy(&repo, &role, "invoice", "read", Effect::Allow, 0).await;
		repo.create_scope_rule(&ScopeRule::field(
			read.id,
			"amount",
			Operator::Lte,
			ScopeValue::parse("$actor.attributes.limit"),
		))
		.await
		.unwrap();
		repo.create_field_mask(&FieldMask::redact(read.id, "iban", MaskConfig::default()))
			.await
			.unwrap();
		seed_policy(&repo, &role, "invoice", "delete", Effect::Deny, 0).await;

		let context = resolver.resolve_context(&identity, Utc::now()).await.unwrap();
		assert!(context.actor().has_role("clerk"));

		let small = json!({ "amount": 250, "iban": "DE89370400440532013000" });
		let result = context.require_record("invoice", Action::Read, &small).unwrap();
		assert_eq!(result.scope_filters.len(), 1);
		assert_eq!(result.field_masks.len(), 1);

		let err = context.require("invoice", Action::Delete, None).unwrap_err();
		assert!(matches!(err, AuthzError::AuthorizationDenied { .. }));
	}

	#[test]
	fn grouping_preserves_order_within_policy() {
		let policy_id = PolicyId::generate();
		let other = PolicyId::generate();
		let masks = vec![
			FieldMask::hide(policy_id, "a"),
			FieldMask::hide(other, "b"),
			FieldMask::hide(policy_id, "c"),
		];
		let grouped = group_by_policy(masks, |mask: &FieldMask| mask.policy_id);
		let paths: Vec<&str> = grouped[&policy_id].iter().map(|m| m.field_path.as_str()).collect();
		assert_eq!(paths, vec!["a", "c"]);
		assert_eq!(grouped[&other].len(), 1);
	}
}
