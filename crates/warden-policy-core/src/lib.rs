// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy model and evaluation for Warden.
//!
//! This crate provides:
//! - The stored policy model: roles, role assignments, policies, scope rules
//!   and field masks
//! - [`PermissionEvaluator`]: a pure, deny-overrides decision over one actor's
//!   resolved policies, producing scope filters and field masks on grant
//! - [`FieldMasker`]: post-decision redaction of response payloads
//!
//! Nothing here performs I/O. Loading policies is the job of
//! `warden-server-db`; resolving them for a request is `warden-server-auth`.
//!
//! # Usage
//!
//! ```ignore
//! use warden_policy_core::{mask, Action, PermissionEvaluator};
//!
//! let evaluator = PermissionEvaluator::new(resolved_policies);
//! let result = evaluator.evaluate(&actor, "invoice", Action::Read, record.as_object());
//! if result.allowed {
//!     let body = mask(&record, &result.field_masks);
//! }
//! ```

pub mod evaluator;
pub mod field_mask;
pub mod masker;
pub mod scope;
pub mod types;

pub use evaluator::PermissionEvaluator;
pub use field_mask::{FieldMask, MaskConfig, MaskConfigError, MaskType};
pub use masker::{mask, mask_array, FieldMasker, MaskingOptions};
pub use scope::{
	json_eq, lookup_path, ActorField, Operator, ScopeCondition, ScopeFilter, ScopeRule, ScopeValue,
	ACTOR_PREFIX,
};
pub use types::*;
