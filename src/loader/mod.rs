pub mod clearance_store;

pub use clearance_store::{ClearanceStore, PgClearanceStore, YamlClearanceStore};
