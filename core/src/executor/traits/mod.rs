pub mod observer;
pub mod runner;
pub mod strategy;

pub use observer::*;
pub use runner::*;
pub use strategy::*;
