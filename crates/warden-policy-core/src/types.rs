// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core type definitions for policy evaluation.
//!
//! This module defines the records the evaluator consumes and produces:
//!
//! - **ID newtypes**: Type-safe wrappers around UUIDs ([`UserId`], [`OrgId`],
//!   [`RoleId`], [`PolicyId`], ...) preventing accidental mixing
//! - **Stored configuration**: [`Role`], [`RoleAssignment`], [`Policy`] and the
//!   fully loaded [`ResolvedPolicy`]
//! - **Per-request values**: [`Actor`] and the [`PermissionResult`] returned by
//!   the evaluator
//!
//! All ID types implement transparent serde serialization (as UUID strings) and
//! provide conversion to/from [`uuid::Uuid`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::field_mask::FieldMask;
use crate::scope::{ScopeFilter, ScopeRule};

/// The wildcard accepted in a policy's resource and action.
pub const WILDCARD: &str = "*";

// =============================================================================
// ID Newtypes
// =============================================================================

macro_rules! define_id_type {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			/// Create a new ID from a UUID.
			pub fn new(id: Uuid) -> Self {
				Self(id)
			}

			/// Generate a new random ID.
			pub fn generate() -> Self {
				Self(Uuid::new_v4())
			}

			/// Get the inner UUID value.
			pub fn into_inner(self) -> Uuid {
				self.0
			}

			/// Get a reference to the inner UUID.
			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<Uuid> for $name {
			fn from(id: Uuid) -> Self {
				Self(id)
			}
		}

		impl From<$name> for Uuid {
			fn from(id: $name) -> Self {
				id.0
			}
		}
	};
}

define_id_type!(UserId, "Unique identifier for a user.");
define_id_type!(OrgId, "Unique identifier for an organization.");
define_id_type!(RoleId, "Unique identifier for a role.");
define_id_type!(RoleAssignmentId, "Unique identifier for a role assignment.");
define_id_type!(PolicyId, "Unique identifier for a policy.");
define_id_type!(ScopeRuleId, "Unique identifier for a scope rule.");
define_id_type!(FieldMaskId, "Unique identifier for a field mask.");

/// Error returned when a stored string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
	pub kind: &'static str,
	pub value: String,
}

impl UnknownVariant {
	fn new(kind: &'static str, value: &str) -> Self {
		Self {
			kind,
			value: value.to_string(),
		}
	}
}

// =============================================================================
// Actions and Effects
// =============================================================================

/// Operations a caller can request on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
	Create,
	Read,
	Update,
	Delete,
	List,
}

impl Action {
	/// Returns all available actions.
	pub fn all() -> &'static [Action] {
		&[
			Action::Create,
			Action::Read,
			Action::Update,
			Action::Delete,
			Action::List,
		]
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Action::Create => "create",
			Action::Read => "read",
			Action::Update => "update",
			Action::Delete => "delete",
			Action::List => "list",
		}
	}
}

impl fmt::Display for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Action {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"create" => Ok(Action::Create),
			"read" => Ok(Action::Read),
			"update" => Ok(Action::Update),
			"delete" => Ok(Action::Delete),
			"list" => Ok(Action::List),
			other => Err(UnknownVariant::new("action", other)),
		}
	}
}

/// The action a policy applies to: one action, or every action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActionPattern {
	Any,
	Only(Action),
}

impl ActionPattern {
	pub fn matches(&self, action: Action) -> bool {
		match self {
			ActionPattern::Any => true,
			ActionPattern::Only(own) => *own == action,
		}
	}
}

impl fmt::Display for ActionPattern {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ActionPattern::Any => f.write_str(WILDCARD),
			ActionPattern::Only(action) => write!(f, "{action}"),
		}
	}
}

impl FromStr for ActionPattern {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s == WILDCARD {
			Ok(ActionPattern::Any)
		} else {
			s.parse().map(ActionPattern::Only)
		}
	}
}

impl TryFrom<String> for ActionPattern {
	type Error = UnknownVariant;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

impl From<ActionPattern> for String {
	fn from(pattern: ActionPattern) -> Self {
		pattern.to_string()
	}
}

impl From<Action> for ActionPattern {
	fn from(action: Action) -> Self {
		ActionPattern::Only(action)
	}
}

/// The resource a policy applies to: one named resource, or every resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourcePattern {
	Any,
	Named(String),
}

impl ResourcePattern {
	pub fn matches(&self, resource: &str) -> bool {
		match self {
			ResourcePattern::Any => true,
			ResourcePattern::Named(name) => name == resource,
		}
	}
}

impl fmt::Display for ResourcePattern {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ResourcePattern::Any => f.write_str(WILDCARD),
			ResourcePattern::Named(name) => f.write_str(name),
		}
	}
}

impl From<&str> for ResourcePattern {
	fn from(value: &str) -> Self {
		if value == WILDCARD {
			ResourcePattern::Any
		} else {
			ResourcePattern::Named(value.to_string())
		}
	}
}

impl From<String> for ResourcePattern {
	fn from(value: String) -> Self {
		if value == WILDCARD {
			ResourcePattern::Any
		} else {
			ResourcePattern::Named(value)
		}
	}
}

impl From<ResourcePattern> for String {
	fn from(pattern: ResourcePattern) -> Self {
		pattern.to_string()
	}
}

/// Whether a matching policy grants or refuses access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
	Allow,
	Deny,
}

impl Effect {
	/// Sort rank used by the evaluator: deny policies are checked first.
	pub(crate) fn evaluation_rank(&self) -> u8 {
		match self {
			Effect::Deny => 0,
			Effect::Allow => 1,
		}
	}
}

impl fmt::Display for Effect {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Effect::Allow => write!(f, "allow"),
			Effect::Deny => write!(f, "deny"),
		}
	}
}

impl FromStr for Effect {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"allow" => Ok(Effect::Allow),
			"deny" => Ok(Effect::Deny),
			other => Err(UnknownVariant::new("effect", other)),
		}
	}
}

// =============================================================================
// Stored Configuration
// =============================================================================

/// A named role within one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
	pub id: RoleId,
	pub organization_id: OrgId,
	pub name: String,
	/// System roles are immutable; enforced by the administrative API.
	pub is_system: bool,
}

/// A role granted to a user, optionally until a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
	pub id: RoleAssignmentId,
	pub user_id: UserId,
	pub role: Role,
	pub expires_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
	/// Returns true if the assignment has not expired at `now`.
	pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
		self.expires_at.map_or(true, |expires_at| expires_at > now)
	}
}

/// A grant or refusal of an action on a resource, owned by a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
	pub id: PolicyId,
	pub organization_id: OrgId,
	pub role_id: RoleId,
	pub resource: ResourcePattern,
	pub action: ActionPattern,
	pub effect: Effect,
	pub priority: i64,
}

impl Policy {
	/// Returns true if this policy covers the resource/action pair.
	pub fn applies_to(&self, resource: &str, action: Action) -> bool {
		self.resource.matches(resource) && self.action.matches(action)
	}
}

/// A policy with its scope rules and field masks loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPolicy {
	pub policy: Policy,
	pub scope_rules: Vec<ScopeRule>,
	pub field_masks: Vec<FieldMask>,
}

impl ResolvedPolicy {
	pub fn new(policy: Policy) -> Self {
		Self {
			policy,
			scope_rules: Vec::new(),
			field_masks: Vec::new(),
		}
	}

	/// Builder: append a scope rule.
	pub fn with_scope_rule(mut self, rule: ScopeRule) -> Self {
		self.scope_rules.push(rule);
		self
	}

	/// Builder: append a field mask.
	pub fn with_field_mask(mut self, mask: FieldMask) -> Self {
		self.field_masks.push(mask);
		self
	}
}

// =============================================================================
// Per-request Values
// =============================================================================

/// The authenticated principal for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
	pub user_id: UserId,
	pub organization_id: OrgId,
	pub roles: Vec<String>,
	#[serde(default)]
	pub attributes: Map<String, Value>,
}

impl Actor {
	/// Creates an actor with no roles or attributes.
	pub fn new(user_id: UserId, organization_id: OrgId) -> Self {
		Self {
			user_id,
			organization_id,
			roles: Vec::new(),
			attributes: Map::new(),
		}
	}

	/// Builder: set role names.
	pub fn with_roles<I, S>(mut self, roles: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.roles = roles.into_iter().map(Into::into).collect();
		self
	}

	/// Builder: set one attribute.
	pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	/// Builder: replace all attributes.
	pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
		self.attributes = attributes;
		self
	}

	/// Returns true if the actor holds the named role.
	pub fn has_role(&self, role: &str) -> bool {
		self.roles.iter().any(|r| r == role)
	}
}

pub const REASON_GRANTED: &str = "permission granted";
pub const REASON_NO_ALLOW: &str = "no allow policies matched";

/// The outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermissionResult {
	pub allowed: bool,
	pub reason: String,
	pub scope_filters: Vec<ScopeFilter>,
	pub field_masks: Vec<FieldMask>,
}

impl PermissionResult {
	/// Create an allow result carrying data restrictions.
	pub fn granted(scope_filters: Vec<ScopeFilter>, field_masks: Vec<FieldMask>) -> Self {
		Self {
			allowed: true,
			reason: REASON_GRANTED.to_string(),
			scope_filters,
			field_masks,
		}
	}

	/// Create a deny result.
	pub fn denied(reason: impl Into<String>) -> Self {
		Self {
			allowed: false,
			reason: reason.into(),
			scope_filters: Vec::new(),
			field_masks: Vec::new(),
		}
	}

	pub(crate) fn no_policies(resource: &str, action: Action) -> Self {
		Self::denied(format!(
			"no policies found for resource '{resource}' and action '{action}'"
		))
	}

	pub(crate) fn denied_by(policy_id: PolicyId) -> Self {
		Self::denied(format!("denied by policy '{policy_id}'"))
	}

	/// Returns true if no scope filters narrow the grant.
	pub fn is_unrestricted(&self) -> bool {
		self.allowed && self.scope_filters.is_empty()
	}
}
