pub mod job;

pub use job::ReconciliationJob;
