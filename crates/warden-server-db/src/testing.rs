// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fixtures for tests that need a policy database.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use warden_policy_core::{
	Action, ActionPattern, Effect, OrgId, Policy, PolicyId, ResourcePattern, Role, RoleAssignment,
	RoleAssignmentId, RoleId, UserId,
};

use crate::migrations::run_migrations;
use crate::policy::PolicyRepository;

/// An empty in-memory database on a single connection.
pub async fn create_test_pool() -> SqlitePool {
	let options = SqliteConnectOptions::from_str(":memory:")
		.unwrap()
		.foreign_keys(true);

	SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.expect("Failed to create test pool")
}

/// An in-memory database with the policy schema applied.
pub async fn create_policy_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	run_migrations(&pool).await.unwrap();
	pool
}

pub async fn seed_role(repo: &PolicyRepository, org_id: OrgId, name: &str) -> Role {
	let role = Role {
		id: RoleId::generate(),
		organization_id: org_id,
		name: name.to_string(),
		is_system: false,
	};
	repo.create_role(&role).await.unwrap();
	role
}

pub async fn seed_assignment(
	repo: &PolicyRepository,
	user_id: UserId,
	role: &Role,
	expires_at: Option<DateTime<Utc>>,
) -> RoleAssignment {
	let assignment = RoleAssignment {
		id: RoleAssignmentId::generate(),
		user_id,
		role: role.clone(),
		expires_at,
	};
	repo.create_role_assignment(&assignment).await.unwrap();
	assignment
}

pub async fn seed_policy(
	repo: &PolicyRepository,
	role: &Role,
	resource: &str,
	action: &str,
	effect: Effect,
	priority: i64,
) -> Policy {
	let policy = Policy {
		id: PolicyId::generate(),
		organization_id: role.organization_id,
		role_id: role.id,
		resource: ResourcePattern::from(resource),
		action: action.parse::<ActionPattern>().unwrap(),
		effect,
		priority,
	};
	repo.create_policy(&policy).await.unwrap();
	policy
}

/// Seeds a role with one unscoped allow policy per action and assigns it.
pub async fn seed_grant(
	repo: &PolicyRepository,
	user_id: UserId,
	org_id: OrgId,
	resource: &str,
	actions: &[Action],
) -> (Role, Vec<Policy>) {
	let role = seed_role(repo, org_id, &format!("{resource}-grant")).await;
	seed_assignment(repo, user_id, &role, None).await;

	let mut policies = Vec::with_capacity(actions.len());
	for action in actions {
		policies.push(seed_policy(repo, &role, resource, action.as_str(), Effect::Allow, 0).await);
	}
	(role, policies)
}
