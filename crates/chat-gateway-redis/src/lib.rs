//! Redis adapter for Chat Gateway
//!
//! This crate provides:
//! - `RedisBus`: Publish and subscribe to gateway topics over Redis Pub/Sub

mod bus;

pub use bus::RedisBus;
