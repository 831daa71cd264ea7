// src/queue/mod.rs

pub mod bridge;
pub mod discovery;
pub mod getter;
pub mod putter;
pub mod wire;

pub use bridge::Bridge;
pub use getter::Getter;
pub use putter::Putter;
