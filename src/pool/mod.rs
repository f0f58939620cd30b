mod connection;
mod stateless;

#[cfg(test)]
pub(crate) mod fake_server;

pub use connection::{ConnectionError, ConnectionState, PooledConnection};
pub use stateless::{StatelessPool, StatelessPoolConfig};
