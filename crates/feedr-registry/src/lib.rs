//! Process-wide feeder registry and startup/shutdown orchestration.

pub mod error;
pub mod registry;
pub mod supervisor;

pub use error::{RegistryError, RegistryResult};
pub use registry::FeedRegistry;
pub use supervisor::{FeederSupervisor, SupervisorConfig};
