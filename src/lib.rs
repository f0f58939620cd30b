//! MySQL replication health probe
//!
//! Answers two questions over HTTP about a single MySQL instance: is it a
//! healthy master, and is it a healthy slave. The checks talk to the server
//! through a small native client (`protocol` + `pool`).

pub mod config;
pub mod health;
pub mod http;
pub mod pool;
pub mod protocol;
