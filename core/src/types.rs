//! Shared primitive types used across the whole crate.

/// A stable, unique identifier for one audited case (contract or supplier).
/// Survives filtering, sorting and export unchanged.
pub type CaseId = String;

/// Identifier of one auditor session.
pub type SessionId = String;

/// Retrospective outcome: 1 = fraud confirmed, 0 = regular.
pub type Label = u8;

/// The only label values a dataset may carry.
pub const VALID_LABELS: [Label; 2] = [0, 1];
