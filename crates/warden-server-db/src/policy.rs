// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy repository for database operations.
//!
//! This module provides read access to the records a permission decision is
//! built from:
//! - Role assignments (joined to their roles, expiry applied)
//! - Policies owned by a set of roles
//! - Scope rules and field masks attached to a set of policies
//!
//! Insert operations exist for provisioning and fixtures; policy
//! administration lives outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
	sqlite::{Sqlite, SqlitePool, SqliteRow},
	QueryBuilder, Row,
};
use uuid::Uuid;
use warden_policy_core::{
	ActionPattern, Effect, FieldMask, FieldMaskId, MaskConfig, MaskType, OrgId, Policy, PolicyId,
	ResourcePattern, Role, RoleAssignment, RoleAssignmentId, RoleId, ScopeCondition, ScopeRule,
	ScopeRuleId, UserId,
};

use crate::error::DbError;

/// Read interface the policy resolver depends on.
#[async_trait]
pub trait PolicyStore: Send + Sync {
	/// Assignments of `user_id` to roles of `org_id` that have not expired at `now`.
	async fn load_active_role_assignments(
		&self,
		org_id: &OrgId,
		user_id: &UserId,
		now: DateTime<Utc>,
	) -> Result<Vec<RoleAssignment>, DbError>;

	/// Policies of `org_id` owned by any of `role_ids`, highest priority first.
	async fn load_policies(
		&self,
		org_id: &OrgId,
		role_ids: &[RoleId],
	) -> Result<Vec<Policy>, DbError>;

	/// Scope rules of any of `policy_ids`, in insertion order.
	async fn load_scope_rules(&self, policy_ids: &[PolicyId]) -> Result<Vec<ScopeRule>, DbError>;

	/// Field masks of any of `policy_ids`, in insertion order.
	async fn load_field_masks(&self, policy_ids: &[PolicyId]) -> Result<Vec<FieldMask>, DbError>;
}

/// Repository for policy database operations.
///
/// All IDs are UUIDs stored as strings in SQLite.
#[derive(Clone)]
pub struct PolicyRepository {
	pool: SqlitePool,
}

impl PolicyRepository {
	/// Create a new repository with the given pool.
	///
	/// # Arguments
	/// * `pool` - SQLite connection pool
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	// =========================================================================
	// Provisioning
	// =========================================================================

	/// Create a role.
	///
	/// # Errors
	/// Returns `DbError::Sqlx` if the insert fails (e.g., duplicate name within
	/// the organization).
	#[tracing::instrument(skip(self, role), fields(role_id = %role.id, org_id = %role.organization_id))]
	pub async fn create_role(&self, role: &Role) -> Result<(), DbError> {
		sqlx::query(
			r#"
			INSERT INTO roles (id, organization_id, name, is_system, created_at)
			VALUES (?, ?, ?, ?, ?)
			"#,
		)
		.bind(role.id.to_string())
		.bind(role.organization_id.to_string())
		.bind(&role.name)
		.bind(role.is_system as i32)
		.bind(Utc::now().to_rfc3339())
		.execute(&self.pool)
		.await?;

		tracing::debug!(role_id = %role.id, name = %role.name, "role created");
		Ok(())
	}

	/// Assign a role to a user.
	#[tracing::instrument(skip(self, assignment), fields(assignment_id = %assignment.id, user_id = %assignment.user_id, role_id = %assignment.role.id))]
	pub async fn create_role_assignment(&self, assignment: &RoleAssignment) -> Result<(), DbError> {
		sqlx::query(
			r#"
			INSERT INTO role_assignments (id, user_id, role_id, expires_at, created_at)
			VALUES (?, ?, ?, ?, ?)
			"#,
		)
		.bind(assignment.id.to_string())
		.bind(assignment.user_id.to_string())
		.bind(assignment.role.id.to_string())
		.bind(assignment.expires_at.map(|d| d.to_rfc3339()))
		.bind(Utc::now().to_rfc3339())
		.execute(&self.pool)
		.await?;

		tracing::debug!(assignment_id = %assignment.id, "role assigned");
		Ok(())
	}

	/// Create a policy.
	#[tracing::instrument(skip(self, policy), fields(policy_id = %policy.id, role_id = %policy.role_id))]
	pub async fn create_policy(&self, policy: &Policy) -> Result<(), DbError> {
		sqlx::query(
			r#"
			INSERT INTO policies (id, organization_id, role_id, resource, action, effect, priority, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(policy.id.to_string())
		.bind(policy.organization_id.to_string())
		.bind(policy.role_id.to_string())
		.bind(policy.resource.to_string())
		.bind(policy.action.to_string())
		.bind(policy.effect.to_string())
		.bind(policy.priority)
		.bind(Utc::now().to_rfc3339())
		.execute(&self.pool)
		.await?;

		tracing::debug!(policy_id = %policy.id, resource = %policy.resource, action = %policy.action, effect = %policy.effect, "policy created");
		Ok(())
	}

	/// Attach a scope rule to its policy.
	///
	/// # Errors
	/// Returns `DbError::Internal` for a [`ScopeCondition::Malformed`] rule.
	#[tracing::instrument(skip(self, rule), fields(scope_rule_id = %rule.id, policy_id = %rule.policy_id))]
	pub async fn create_scope_rule(&self, rule: &ScopeRule) -> Result<(), DbError> {
		let (rule_type, field, operator, value, relation_path) = match &rule.condition {
			ScopeCondition::Field {
				field,
				operator,
				value,
			} => (
				"field",
				Some(field.clone()),
				Some(operator.as_str()),
				Some(value.to_raw()),
				None,
			),
			ScopeCondition::Relation {
				relation_path,
				value,
			} => (
				"relation",
				None,
				None,
				value.as_ref().map(|v| v.to_raw()),
				Some(relation_path.clone()),
			),
			ScopeCondition::Malformed { reason } => {
				return Err(DbError::Internal(format!(
					"Refusing to store malformed scope rule: {reason}"
				)));
			}
		};

		sqlx::query(
			r#"
			INSERT INTO scope_rules (id, policy_id, rule_type, field, operator, value, relation_path, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(rule.id.to_string())
		.bind(rule.policy_id.to_string())
		.bind(rule_type)
		.bind(field)
		.bind(operator)
		.bind(value)
		.bind(relation_path)
		.bind(Utc::now().to_rfc3339())
		.execute(&self.pool)
		.await?;

		tracing::debug!(scope_rule_id = %rule.id, rule_type, "scope rule created");
		Ok(())
	}

	/// Attach a field mask to its policy.
	#[tracing::instrument(skip(self, mask), fields(field_mask_id = %mask.id, policy_id = %mask.policy_id))]
	pub async fn create_field_mask(&self, mask: &FieldMask) -> Result<(), DbError> {
		let config = serde_json::to_string(&mask.config)?;

		sqlx::query(
			r#"
			INSERT INTO field_masks (id, policy_id, field_path, mask_type, config, created_at)
			VALUES (?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(mask.id.to_string())
		.bind(mask.policy_id.to_string())
		.bind(&mask.field_path)
		.bind(mask.mask_type.to_string())
		.bind(config)
		.bind(Utc::now().to_rfc3339())
		.execute(&self.pool)
		.await?;

		tracing::debug!(field_mask_id = %mask.id, field_path = %mask.field_path, "field mask created");
		Ok(())
	}

	// =========================================================================
	// Resolution reads
	// =========================================================================

	/// Load the user's role assignments within an organization.
	///
	/// Expired assignments (`expires_at <= now`) are dropped.
	#[tracing::instrument(skip(self), fields(org_id = %org_id, user_id = %user_id))]
	pub async fn load_active_role_assignments(
		&self,
		org_id: &OrgId,
		user_id: &UserId,
		now: DateTime<Utc>,
	) -> Result<Vec<RoleAssignment>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT a.id, a.user_id, a.expires_at,
				r.id AS role_id, r.organization_id, r.name, r.is_system
			FROM role_assignments a
			INNER JOIN roles r ON r.id = a.role_id
			WHERE a.user_id = ? AND r.organization_id = ?
			ORDER BY a.created_at ASC, a.rowid ASC
			"#,
		)
		.bind(user_id.to_string())
		.bind(org_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		let assignments: Result<Vec<_>, _> = rows.iter().map(row_to_assignment).collect();
		let assignments: Vec<RoleAssignment> = assignments?
			.into_iter()
			.filter(|a| a.is_active_at(now))
			.collect();

		tracing::debug!(count = assignments.len(), "loaded active role assignments");
		Ok(assignments)
	}

	/// Load the organization's policies owned by any of the given roles.
	#[tracing::instrument(skip(self, role_ids), fields(org_id = %org_id, roles = role_ids.len()))]
	pub async fn load_policies(
		&self,
		org_id: &OrgId,
		role_ids: &[RoleId],
	) -> Result<Vec<Policy>, DbError> {
		if role_ids.is_empty() {
			return Ok(Vec::new());
		}

		let mut builder = QueryBuilder::<Sqlite>::new(
			"SELECT id, organization_id, role_id, resource, action, effect, priority FROM policies WHERE organization_id = ",
		);
		builder.push_bind(org_id.to_string());
		builder.push(" AND role_id IN (");
		let mut ids = builder.separated(", ");
		for role_id in role_ids {
			ids.push_bind(role_id.to_string());
		}
		ids.push_unseparated(") ORDER BY priority DESC, created_at ASC, rowid ASC");

		let rows = builder.build().fetch_all(&self.pool).await?;
		let policies: Result<Vec<_>, _> = rows.iter().map(row_to_policy).collect();
		let policies = policies?;

		tracing::debug!(count = policies.len(), "loaded policies");
		Ok(policies)
	}

	/// Load the scope rules attached to any of the given policies.
	///
	/// Rows that cannot be interpreted load as [`ScopeCondition::Malformed`].
	#[tracing::instrument(skip(self, policy_ids), fields(policies = policy_ids.len()))]
	pub async fn load_scope_rules(&self, policy_ids: &[PolicyId]) -> Result<Vec<ScopeRule>, DbError> {
		if policy_ids.is_empty() {
			return Ok(Vec::new());
		}

		let mut builder = QueryBuilder::<Sqlite>::new(
			"SELECT id, policy_id, rule_type, field, operator, value, relation_path FROM scope_rules WHERE policy_id IN (",
		);
		let mut ids = builder.separated(", ");
		for policy_id in policy_ids {
			ids.push_bind(policy_id.to_string());
		}
		ids.push_unseparated(") ORDER BY created_at ASC, rowid ASC");

		let rows = builder.build().fetch_all(&self.pool).await?;
		let rules: Result<Vec<_>, _> = rows.iter().map(row_to_scope_rule).collect();
		let rules = rules?;

		tracing::debug!(count = rules.len(), "loaded scope rules");
		Ok(rules)
	}

	/// Load the field masks attached to any of the given policies.
	#[tracing::instrument(skip(self, policy_ids), fields(policies = policy_ids.len()))]
	pub async fn load_field_masks(&self, policy_ids: &[PolicyId]) -> Result<Vec<FieldMask>, DbError> {
		if policy_ids.is_empty() {
			return Ok(Vec::new());
		}

		let mut builder = QueryBuilder::<Sqlite>::new(
			"SELECT id, policy_id, field_path, mask_type, config FROM field_masks WHERE policy_id IN (",
		);
		let mut ids = builder.separated(", ");
		for policy_id in policy_ids {
			ids.push_bind(policy_id.to_string());
		}
		ids.push_unseparated(") ORDER BY created_at ASC, rowid ASC");

		let rows = builder.build().fetch_all(&self.pool).await?;
		let masks: Result<Vec<_>, _> = rows.iter().map(row_to_field_mask).collect();
		let masks = masks?;

		tracing::debug!(count = masks.len(), "loaded field masks");
		Ok(masks)
	}
}

#[async_trait]
impl PolicyStore for PolicyRepository {
	async fn load_active_role_assignments(
		&self,
		org_id: &OrgId,
		user_id: &UserId,
		now: DateTime<Utc>,
	) -> Result<Vec<RoleAssignment>, DbError> {
		self.load_active_role_assignments(org_id, user_id, now).await
	}

	async fn load_policies(
		&self,
		org_id: &OrgId,
		role_ids: &[RoleId],
	) -> Result<Vec<Policy>, DbError> {
		self.load_policies(org_id, role_ids).await
	}

	async fn load_scope_rules(&self, policy_ids: &[PolicyId]) -> Result<Vec<ScopeRule>, DbError> {
		self.load_scope_rules(policy_ids).await
	}

	async fn load_field_masks(&self, policy_ids: &[PolicyId]) -> Result<Vec<FieldMask>, DbError> {
		self.load_field_masks(policy_ids).await
	}
}

// =============================================================================
// Row decoding
// =============================================================================

fn parse_uuid(value: &str, column: &str) -> Result<Uuid, DbError> {
	Uuid::parse_str(value).map_err(|e| DbError::Internal(format!("Invalid {column}: {e}")))
}

fn row_to_assignment(row: &SqliteRow) -> Result<RoleAssignment, DbError> {
	let id: String = row.get("id");
	let user_id: String = row.get("user_id");
	let role_id: String = row.get("role_id");
	let org_id: String = row.get("organization_id");
	let is_system: i32 = row.get("is_system");
	let expires_at: Option<String> = row.get("expires_at");

	let expires_at = expires_at
		.map(|s| {
			DateTime::parse_from_rfc3339(&s)
				.map(|d| d.with_timezone(&Utc))
				.map_err(|e| DbError::Internal(format!("Invalid expires_at: {e}")))
		})
		.transpose()?;

	Ok(RoleAssignment {
		id: RoleAssignmentId::new(parse_uuid(&id, "role assignment ID")?),
		user_id: UserId::new(parse_uuid(&user_id, "user_id")?),
		role: Role {
			id: RoleId::new(parse_uuid(&role_id, "role_id")?),
			organization_id: OrgId::new(parse_uuid(&org_id, "organization_id")?),
			name: row.get("name"),
			is_system: is_system != 0,
		},
		expires_at,
	})
}

fn row_to_policy(row: &SqliteRow) -> Result<Policy, DbError> {
	let id: String = row.get("id");
	let org_id: String = row.get("organization_id");
	let role_id: String = row.get("role_id");
	let resource: String = row.get("resource");
	let action: String = row.get("action");
	let effect: String = row.get("effect");

	let action: ActionPattern = action
		.parse()
		.map_err(|e| DbError::Internal(format!("Invalid policy action: {e}")))?;
	let effect: Effect = effect
		.parse()
		.map_err(|e| DbError::Internal(format!("Invalid policy effect: {e}")))?;

	Ok(Policy {
		id: PolicyId::new(parse_uuid(&id, "policy ID")?),
		organization_id: OrgId::new(parse_uuid(&org_id, "organization_id")?),
		role_id: RoleId::new(parse_uuid(&role_id, "role_id")?),
		resource: ResourcePattern::from(resource),
		action,
		effect,
		priority: row.get("priority"),
	})
}

fn row_to_scope_rule(row: &SqliteRow) -> Result<ScopeRule, DbError> {
	let id: String = row.get("id");
	let policy_id: String = row.get("policy_id");
	let rule_type: String = row.get("rule_type");
	let field: Option<String> = row.get("field");
	let operator: Option<String> = row.get("operator");
	let value: Option<String> = row.get("value");
	let relation_path: Option<String> = row.get("relation_path");

	Ok(ScopeRule::from_record(
		ScopeRuleId::new(parse_uuid(&id, "scope rule ID")?),
		PolicyId::new(parse_uuid(&policy_id, "policy_id")?),
		&rule_type,
		field.as_deref(),
		operator.as_deref(),
		value.as_deref(),
		relation_path.as_deref(),
	))
}

fn row_to_field_mask(row: &SqliteRow) -> Result<FieldMask, DbError> {
	let id: String = row.get("id");
	let policy_id: String = row.get("policy_id");
	let field_path: String = row.get("field_path");
	let mask_type: String = row.get("mask_type");
	let config: Option<String> = row.get("config");

	let mask_type: MaskType = mask_type
		.parse()
		.map_err(|e| DbError::Internal(format!("Invalid mask_type: {e}")))?;
	let config: MaskConfig = match config.as_deref().filter(|c| !c.trim().is_empty()) {
		Some(raw) => serde_json::from_str(raw)?,
		None => MaskConfig::default(),
	};

	Ok(FieldMask::new(
		FieldMaskId::new(parse_uuid(&id, "field mask ID")?),
		PolicyId::new(parse_uuid(&policy_id, "policy_id")?),
		field_path,
		mask_type,
		config,
	))
}
