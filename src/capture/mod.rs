pub mod aggregator;
pub mod analyzer;
pub mod decoder;
pub mod dissector;
pub mod manager;
pub mod reader;
pub mod session;
pub mod synth;
pub mod writer;
