pub mod builder;
pub mod bus;
pub mod codec;
pub mod config;
pub mod delivery;
pub mod message;
pub mod packager;
pub mod platform;
pub mod scheduler;
pub mod stats;
