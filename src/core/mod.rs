//! Shared infrastructure used by the probe and the binary.

pub mod http_client;
