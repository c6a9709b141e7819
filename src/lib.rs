// Library root for Query Warden

pub mod audit;
pub mod authz;
pub mod config;
pub mod core;
pub mod loader;
pub mod pii;
pub mod proxy;
pub mod risk;

pub use crate::config::Config;
pub use crate::core::errors::{ExecutorError, GovernanceError};
pub use crate::core::models::{GovernanceQueryRequest, QueryResult, QueryVerdict};
pub use crate::proxy::{GovernanceProxy, QueryExecutor};
