pub mod local;

pub use local::LocalDiscoveryAgents;
