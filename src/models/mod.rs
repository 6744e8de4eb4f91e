pub mod config;
pub mod message;
pub mod packet;
pub mod stats;
