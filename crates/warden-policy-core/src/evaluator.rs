// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission evaluation engine.
//!
//! [`PermissionEvaluator::evaluate`] decides one request against the actor's
//! resolved policies:
//!
//! 1. **Match**: keep policies whose resource and action cover the request
//!    (`"*"` matches anything)
//! 2. **Order**: deny policies first, then by priority, highest first
//! 3. **Scope**: evaluate each policy's scope rules against the actor and,
//!    when supplied, the resource data
//! 4. **Effect**: a scope-matched deny ends evaluation; scope-matched allows
//!    contribute their scope filters and field masks
//!
//! Evaluation is pure: no I/O, no shared state, and no errors. Every outcome
//! is a [`PermissionResult`].

use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::HashSet;
use tracing::instrument;

use crate::field_mask::FieldMask;
use crate::scope::{lookup_path, Operator, ScopeCondition, ScopeFilter};
use crate::types::{Action, Actor, Effect, PermissionResult, ResolvedPolicy, REASON_NO_ALLOW};

/// Decides requests for one actor's resolved policy set.
#[derive(Debug, Clone, Default)]
pub struct PermissionEvaluator {
	policies: Vec<ResolvedPolicy>,
}

impl PermissionEvaluator {
	pub fn new(policies: Vec<ResolvedPolicy>) -> Self {
		Self { policies }
	}

	pub fn policies(&self) -> &[ResolvedPolicy] {
		&self.policies
	}

	/// Evaluates whether `actor` may perform `action` on `resource`.
	///
	/// Without `resource_data` (list and query-time checks) field rules are
	/// not compared; they only contribute scope filters for the storage layer.
	#[instrument(
		level = "debug",
		skip_all,
		fields(
			user_id = %actor.user_id,
			org_id = %actor.organization_id,
			resource = %resource,
			action = %action,
			has_data = resource_data.is_some(),
			allowed = tracing::field::Empty,
		)
	)]
	pub fn evaluate(
		&self,
		actor: &Actor,
		resource: &str,
		action: Action,
		resource_data: Option<&Map<String, Value>>,
	) -> PermissionResult {
		let result = self.decide(actor, resource, action, resource_data);
		tracing::Span::current().record("allowed", result.allowed);
		tracing::debug!(reason = %result.reason, filters = result.scope_filters.len(), masks = result.field_masks.len(), "permission evaluated");
		result
	}

	fn decide(
		&self,
		actor: &Actor,
		resource: &str,
		action: Action,
		resource_data: Option<&Map<String, Value>>,
	) -> PermissionResult {
		let mut matched: Vec<&ResolvedPolicy> = self
			.policies
			.iter()
			.filter(|resolved| resolved.policy.applies_to(resource, action))
			.collect();

		if matched.is_empty() {
			return PermissionResult::no_policies(resource, action);
		}

		matched.sort_by_key(|resolved| {
			(
				resolved.policy.effect.evaluation_rank(),
				Reverse(resolved.policy.priority),
			)
		});

		let mut has_allow = false;
		let mut scope_filters = Vec::new();
		let mut field_masks = Vec::new();

		for resolved in matched {
			let policy = &resolved.policy;
			if policy.effect == Effect::Allow {
				has_allow = true;
			}

			let Some(filters) = evaluate_scope(resolved, actor, resource_data) else {
				tracing::trace!(policy_id = %policy.id, effect = %policy.effect, "policy scope did not match");
				continue;
			};

			match policy.effect {
				Effect::Deny => {
					tracing::info!(
						user_id = %actor.user_id,
						policy_id = %policy.id,
						resource = %resource,
						action = %action,
						"denied by policy"
					);
					return PermissionResult::denied_by(policy.id);
				}
				Effect::Allow => {
					scope_filters.extend(filters);
					field_masks.extend(resolved.field_masks.iter().cloned());
				}
			}
		}

		if !has_allow {
			return PermissionResult::denied(REASON_NO_ALLOW);
		}

		PermissionResult::granted(dedup_filters(scope_filters), dedup_masks(field_masks))
	}
}

/// Evaluates a policy's scope rules in order.
///
/// Returns the emitted filters when every rule matches, `None` at the first
/// rule that does not.
fn evaluate_scope(
	resolved: &ResolvedPolicy,
	actor: &Actor,
	resource_data: Option<&Map<String, Value>>,
) -> Option<Vec<ScopeFilter>> {
	let mut filters = Vec::with_capacity(resolved.scope_rules.len());

	for rule in &resolved.scope_rules {
		match &rule.condition {
			ScopeCondition::Field {
				field,
				operator,
				value,
			} => {
				let resolved = value.resolve(actor);
				let expected = operator.typed_target(&resolved).into_owned();
				if let Some(data) = resource_data {
					if !operator.compare(lookup_path(data, field), &expected) {
						return None;
					}
				}
				filters.push(ScopeFilter::new(field.clone(), *operator, expected));
			}
			ScopeCondition::Relation {
				relation_path,
				value,
			} => {
				let expected = value
					.as_ref()
					.filter(|value| !value.is_empty())
					.map(|value| value.resolve(actor))
					.unwrap_or_else(|| Value::String(actor.user_id.to_string()));
				if let Some(data) = resource_data {
					if !Operator::Eq.compare(lookup_path(data, relation_path), &expected) {
						return None;
					}
				}
				filters.push(ScopeFilter::new(relation_path.clone(), Operator::Eq, expected));
			}
			ScopeCondition::Malformed { reason } => {
				tracing::warn!(
					scope_rule_id = %rule.id,
					policy_id = %rule.policy_id,
					%reason,
					"malformed scope rule never matches"
				);
				return None;
			}
		}
	}

	Some(filters)
}

fn dedup_filters(filters: Vec<ScopeFilter>) -> Vec<ScopeFilter> {
	let mut seen = HashSet::new();
	filters
		.into_iter()
		.filter(|filter| seen.insert(filter.dedup_key()))
		.collect()
}

fn dedup_masks(masks: Vec<FieldMask>) -> Vec<FieldMask> {
	let mut seen = HashSet::new();
	masks
		.into_iter()
		.filter(|mask| seen.insert(mask.dedup_key()))
		.collect()
}
