// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared domain types for the sentinel trust-and-data plane: the
//! `TenantId` newtype used by every crate in the workspace so the same
//! identifier flows from the HTTP boundary through the database layer
//! without re-parsing.

/// Core domain models shared across the workspace.
pub mod models;

pub use models::TenantId;
