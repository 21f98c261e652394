pub mod discovery;
pub mod executor;
pub mod factory;
pub mod runner;
pub mod services;
