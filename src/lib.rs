//! Reassembles packet captures delivered as encoded chunks and reports
//! per-packet details plus aggregate statistics.

pub mod api;
pub mod capture;
pub mod client;
pub mod models;
pub mod utils;
