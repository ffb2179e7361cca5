// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The authenticated caller, as established before authorization runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use warden_policy_core::{Actor, OrgId, UserId};

/// Who is calling, and on behalf of which organization.
///
/// Inserted into request extensions by the authentication layer. Attributes
/// are free-form and referenced by scope rules as `$actor.attributes.<path>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
	pub user_id: UserId,
	pub organization_id: OrgId,
	#[serde(default)]
	pub attributes: Map<String, Value>,
}

impl Identity {
	pub fn new(user_id: UserId, organization_id: OrgId) -> Self {
		Self {
			user_id,
			organization_id,
			attributes: Map::new(),
		}
	}

	/// Builder: set one attribute.
	pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	/// The actor for this identity holding the given roles.
	pub fn to_actor(&self, roles: Vec<String>) -> Actor {
		Actor::new(self.user_id, self.organization_id)
			.with_roles(roles)
			.with_attributes(self.attributes.clone())
	}
}
