pub mod booking;
pub mod conflict;
pub mod lifecycle;
pub mod memory_store;
pub mod store;
pub mod supabase_store;

pub use booking::SchedulingEngine;
pub use lifecycle::AppointmentLifecycleService;
pub use memory_store::InMemorySchedulingStore;
pub use store::{SchedulingStore, StoreError};
pub use supabase_store::SupabaseSchedulingStore;
