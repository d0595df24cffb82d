//! Configuration types for calbridge.

mod bridge_config;
mod sync_policy;

pub use bridge_config::{BridgeConfig, ReplicaConfig, SyncedCalendarConfig};
pub use sync_policy::SyncPolicy;
