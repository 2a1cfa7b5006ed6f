// =====================================================================================
// SECURITY CELL - ACCESS POLICY & AUDIT
// =====================================================================================
//
// Role/ownership rules consulted before every scheduling mutation, and the
// append-only log of appointment status transitions and care team changes.
//
// =====================================================================================

pub mod models;
pub mod services;

pub use models::{
    AccessDecision, AccessTarget, Action, AuditError, CareTeamChange, CareTeamEvent, TransitionEvent,
};
pub use services::{AccessPolicy, AuditService, AuditSink, InMemoryAuditSink, SupabaseAuditSink};
