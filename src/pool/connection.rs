use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error};

use crate::config::BackendConfig;
use crate::protocol::{
    capabilities, command, compute_auth_response, is_err_packet, is_ok_packet, AuthSwitchRequest,
    ErrPacket, HandshakeResponse, InitialHandshake, Packet, PacketCodec, ResultSet,
    ResultSetBuilder, ResultSetError, NATIVE_PASSWORD_PLUGIN,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is available for use
    Idle,
    /// Connection is currently in use
    InUse,
    /// Connection is broken/closed
    Closed,
}

/// A wrapper around a MySQL backend connection
pub struct PooledConnection {
    framed: Framed<TcpStream, PacketCodec>,
    state: ConnectionState,
    created_at: Instant,
    last_used_at: Instant,
    /// Negotiated capability flags
    capabilities: u32,
    /// Set while a command is out and nothing has come back yet
    awaiting_response: bool,
}

impl PooledConnection {
    /// Open and authenticate a new connection to the backend
    pub async fn connect(config: &BackendConfig) -> Result<Self, ConnectionError> {
        let addr = config.addr();
        debug!(addr = %addr, "Connecting to backend");

        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            error!(addr = %addr, error = %e, "Failed to connect to backend");
            ConnectionError::Connect(e.to_string())
        })?;

        let mut framed = Framed::new(stream, PacketCodec);

        let handshake_packet = framed
            .next()
            .await
            .ok_or(ConnectionError::Disconnected)?
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if is_err_packet(&handshake_packet.payload) {
            // e.g. "Host is blocked", sent instead of a handshake
            let err = ErrPacket::parse(&handshake_packet.payload, 0)
                .unwrap_or_else(|| ErrPacket::new(0, "HY000", "Connection refused by server"));
            return Err(ConnectionError::Connect(err.error_message));
        }

        let backend_handshake = InitialHandshake::parse(&handshake_packet.payload)
            .ok_or_else(|| ConnectionError::Protocol("Invalid backend handshake".into()))?;

        debug!(
            server_version = %backend_handshake.server_version,
            connection_id = backend_handshake.connection_id,
            "Received backend handshake"
        );

        let mut caps = capabilities::DEFAULT_CAPABILITIES & backend_handshake.capability_flags;
        if config.database.is_none() {
            caps &= !capabilities::CLIENT_CONNECT_WITH_DB;
        }

        // Always answer with the native scramble; servers defaulting to
        // another plugin reply with an auth switch request.
        let auth_response =
            compute_auth_response(&config.password, &backend_handshake.auth_plugin_data());

        let response = HandshakeResponse {
            capability_flags: caps,
            max_packet_size: 16 * 1024 * 1024,
            character_set: 0x21, // utf8_general_ci
            username: config.user.clone(),
            auth_response,
            database: config.database.clone(),
            auth_plugin_name: NATIVE_PASSWORD_PLUGIN.to_string(),
        };

        framed
            .send(response.encode(handshake_packet.sequence_id.wrapping_add(1)))
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        let mut reply = Self::recv_auth_reply(&mut framed).await?;

        if reply.payload.first() == Some(&0xFE) {
            let switch = AuthSwitchRequest::parse(&reply.payload)
                .ok_or_else(|| ConnectionError::Protocol("Invalid auth switch request".into()))?;
            if switch.plugin_name != NATIVE_PASSWORD_PLUGIN {
                return Err(ConnectionError::Auth(format!(
                    "unsupported auth plugin {}",
                    switch.plugin_name
                )));
            }
            debug!("Backend requested auth switch to mysql_native_password");
            let scramble = compute_auth_response(&config.password, &switch.plugin_data);
            framed
                .send(Packet::new(reply.sequence_id.wrapping_add(1), scramble))
                .await
                .map_err(|e| ConnectionError::Io(e.to_string()))?;
            reply = Self::recv_auth_reply(&mut framed).await?;
        }

        if is_err_packet(&reply.payload) {
            let err = ErrPacket::parse(&reply.payload, caps)
                .unwrap_or_else(|| ErrPacket::new(1045, "28000", "Access denied"));
            error!(
                error_code = err.error_code,
                error_message = %err.error_message,
                "Backend authentication failed"
            );
            return Err(ConnectionError::Auth(err.error_message));
        }

        if !is_ok_packet(&reply.payload) {
            return Err(ConnectionError::Protocol(
                "Expected OK packet from backend".into(),
            ));
        }

        debug!("Backend authentication successful");

        let now = Instant::now();
        Ok(Self {
            framed,
            state: ConnectionState::Idle,
            created_at: now,
            last_used_at: now,
            capabilities: caps,
            awaiting_response: false,
        })
    }

    async fn recv_auth_reply(
        framed: &mut Framed<TcpStream, PacketCodec>,
    ) -> Result<Packet, ConnectionError> {
        framed
            .next()
            .await
            .ok_or(ConnectionError::Disconnected)?
            .map_err(|e| ConnectionError::Io(e.to_string()))
    }

    /// Run a text-protocol query and buffer its full result set
    pub async fn query(&mut self, sql: &str) -> Result<ResultSet, ConnectionError> {
        self.awaiting_response = true;
        self.send(Packet::command(command::COM_QUERY, sql.as_bytes()))
            .await?;

        let mut builder = ResultSetBuilder::new(self.capabilities);
        loop {
            let packet = self.recv().await?;
            self.awaiting_response = false;
            match builder.push(&packet) {
                Ok(true) => break,
                Ok(false) => continue,
                Err(ResultSetError::Server(err)) => {
                    self.last_used_at = Instant::now();
                    return Err(ConnectionError::Server {
                        code: err.error_code,
                        state: err.sql_state,
                        message: err.error_message,
                    });
                }
                Err(ResultSetError::Malformed(msg)) => {
                    // Stream position is unknown from here on
                    self.state = ConnectionState::Closed;
                    return Err(ConnectionError::Protocol(msg));
                }
            }
        }

        self.last_used_at = Instant::now();
        Ok(builder.finish())
    }

    /// True when the last query failed before the server answered at all,
    /// which on a reused connection means the server dropped it while idle
    pub fn failed_before_response(&self) -> bool {
        self.awaiting_response
    }

    /// Check if connection is healthy by sending a ping
    pub async fn ping(&mut self) -> bool {
        self.simple_command(command::COM_PING).await
    }

    async fn simple_command(&mut self, cmd: u8) -> bool {
        if self.send(Packet::command(cmd, &[])).await.is_err() {
            return false;
        }

        match self.recv().await {
            Ok(packet) if is_ok_packet(&packet.payload) => {
                self.last_used_at = Instant::now();
                true
            }
            _ => {
                self.state = ConnectionState::Closed;
                false
            }
        }
    }

    /// Tell the server we are going away; errors are irrelevant at this point
    pub async fn quit(mut self) {
        let _ = self.framed.send(Packet::command(command::COM_QUIT, &[])).await;
        self.state = ConnectionState::Closed;
    }

    /// Check if connection has exceeded max age
    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.created_at.elapsed() > max_age
    }

    /// Check if connection has been idle too long
    pub fn is_idle_too_long(&self, max_idle: Duration) -> bool {
        self.last_used_at.elapsed() > max_idle
    }

    /// Mark connection as in use
    pub fn acquire(&mut self) {
        self.state = ConnectionState::InUse;
        self.last_used_at = Instant::now();
    }

    /// Mark connection as available
    pub fn release(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Idle;
        }
        self.last_used_at = Instant::now();
    }

    /// Check if connection is usable
    pub fn is_usable(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    async fn send(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        match self.framed.send(packet).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = ConnectionState::Closed;
                Err(ConnectionError::Io(e.to_string()))
            }
        }
    }

    async fn recv(&mut self) -> Result<Packet, ConnectionError> {
        match self.framed.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => {
                self.state = ConnectionState::Closed;
                Err(ConnectionError::Io(e.to_string()))
            }
            None => {
                self.state = ConnectionState::Closed;
                Err(ConnectionError::Disconnected)
            }
        }
    }
}

/// Connection and query errors.
///
/// These are surfaced to HTTP callers verbatim, so the messages are kept
/// close to what the server said.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Error {code} ({state}): {message}")]
    Server {
        code: u16,
        state: String,
        message: String,
    },

    #[error("Connection disconnected")]
    Disconnected,
}
