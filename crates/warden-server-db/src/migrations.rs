// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schema for the policy tables.
//!
//! Statements are idempotent (`IF NOT EXISTS`) and run in order on startup.
//! Timestamps are RFC 3339 text, identifiers are UUID text.

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

const SCHEMA: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS roles (
		id TEXT PRIMARY KEY NOT NULL,
		organization_id TEXT NOT NULL,
		name TEXT NOT NULL,
		is_system INTEGER NOT NULL DEFAULT 0,
		created_at TEXT NOT NULL,
		UNIQUE (organization_id, name)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS role_assignments (
		id TEXT PRIMARY KEY NOT NULL,
		user_id TEXT NOT NULL,
		role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
		expires_at TEXT,
		created_at TEXT NOT NULL
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_role_assignments_user ON role_assignments(user_id)",
	r#"
	CREATE TABLE IF NOT EXISTS policies (
		id TEXT PRIMARY KEY NOT NULL,
		organization_id TEXT NOT NULL,
		role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
		resource TEXT NOT NULL,
		action TEXT NOT NULL,
		effect TEXT NOT NULL CHECK (effect IN ('allow', 'deny')),
		priority INTEGER NOT NULL DEFAULT 0,
		created_at TEXT NOT NULL
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_policies_org_role ON policies(organization_id, role_id)",
	r#"
	CREATE TABLE IF NOT EXISTS scope_rules (
		id TEXT PRIMARY KEY NOT NULL,
		policy_id TEXT NOT NULL REFERENCES policies(id) ON DELETE CASCADE,
		rule_type TEXT NOT NULL,
		field TEXT,
		operator TEXT,
		value TEXT,
		relation_path TEXT,
		created_at TEXT NOT NULL
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_scope_rules_policy ON scope_rules(policy_id)",
	r#"
	CREATE TABLE IF NOT EXISTS field_masks (
		id TEXT PRIMARY KEY NOT NULL,
		policy_id TEXT NOT NULL REFERENCES policies(id) ON DELETE CASCADE,
		field_path TEXT NOT NULL,
		mask_type TEXT NOT NULL CHECK (mask_type IN ('hide', 'redact')),
		config TEXT,
		created_at TEXT NOT NULL
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_field_masks_policy ON field_masks(policy_id)",
];

/// Create the policy tables and indexes if they do not exist.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	for statement in SCHEMA {
		sqlx::query(statement).execute(pool).await?;
	}
	tracing::debug!(statements = SCHEMA.len(), "policy schema applied");
	Ok(())
}
