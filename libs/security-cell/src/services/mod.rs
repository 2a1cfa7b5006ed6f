pub mod audit;
pub mod policy;

pub use audit::{AuditService, AuditSink, InMemoryAuditSink, SupabaseAuditSink};
pub use policy::AccessPolicy;
