use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use super::packet::{capabilities::*, Packet};

pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";

/// MySQL initial handshake packet (server -> client)
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data_part1: [u8; 8],
    pub capability_flags: u32,
    pub character_set: u8,
    pub status_flags: u16,
    pub auth_plugin_data_part2: Vec<u8>,
    pub auth_plugin_name: String,
}

impl InitialHandshake {
    /// Get full auth plugin data (20 bytes)
    pub fn auth_plugin_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(20);
        data.extend_from_slice(&self.auth_plugin_data_part1);
        data.extend_from_slice(&self.auth_plugin_data_part2);
        data
    }

    /// Parse from packet payload
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 32 {
            return None;
        }

        let mut buf = payload;

        let protocol_version = buf.get_u8();

        // Server version (null-terminated string)
        let null_pos = buf.iter().position(|&b| b == 0)?;
        let server_version = String::from_utf8_lossy(&buf[..null_pos]).to_string();
        buf.advance(null_pos + 1);

        // connection id + salt part 1 + filler + caps + charset + status + caps + len + reserved
        if buf.len() < 4 + 8 + 1 + 2 + 1 + 2 + 2 + 1 + 10 {
            return None;
        }

        // Connection ID
        let connection_id = buf.get_u32_le();

        // Auth plugin data part 1 (8 bytes)
        let mut auth_plugin_data_part1 = [0u8; 8];
        auth_plugin_data_part1.copy_from_slice(&buf[..8]);
        buf.advance(8);

        // Filler
        buf.advance(1);

        // Capability flags (lower 2 bytes)
        let capability_flags_lower = buf.get_u16_le() as u32;
        // Character set
        let character_set = buf.get_u8();
        // Status flags
        let status_flags = buf.get_u16_le();
        // Capability flags (upper 2 bytes)
        let capability_flags_upper = buf.get_u16_le() as u32;
        let capability_flags = capability_flags_lower | (capability_flags_upper << 16);

        // Auth plugin data length
        let auth_plugin_data_len = buf.get_u8();

        // Reserved
        buf.advance(10);

        // Auth plugin data part 2
        let mut auth_plugin_data_part2 = Vec::new();
        if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let len = std::cmp::max(13, (auth_plugin_data_len as usize).saturating_sub(8))
                .min(buf.len());
            let data_len = buf.iter().take(len).position(|&b| b == 0).unwrap_or(len);
            auth_plugin_data_part2.extend_from_slice(&buf[..data_len]);
            buf.advance(len);
        }

        // Auth plugin name
        let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 && !buf.is_empty() {
            let null_pos = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            String::from_utf8_lossy(&buf[..null_pos]).to_string()
        } else {
            NATIVE_PASSWORD_PLUGIN.to_string()
        };

        Some(Self {
            protocol_version,
            server_version,
            connection_id,
            auth_plugin_data_part1,
            capability_flags,
            character_set,
            status_flags,
            auth_plugin_data_part2,
            auth_plugin_name,
        })
    }
}

/// MySQL handshake response packet (client -> server)
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: String,
}

impl HandshakeResponse {
    /// Encode to packet
    pub fn encode(&self, sequence_id: u8) -> Packet {
        let mut buf = BytesMut::new();

        buf.put_u32_le(self.capability_flags);
        buf.put_u32_le(self.max_packet_size);
        buf.put_u8(self.character_set);

        // Reserved (23 bytes)
        buf.extend_from_slice(&[0u8; 23]);

        // Username
        buf.extend_from_slice(self.username.as_bytes());
        buf.put_u8(0);

        // Auth response (length-prefixed)
        if self.capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            buf.put_u8(self.auth_response.len() as u8);
            buf.extend_from_slice(&self.auth_response);
        } else {
            buf.extend_from_slice(&self.auth_response);
            buf.put_u8(0);
        }

        // Database
        if self.capability_flags & CLIENT_CONNECT_WITH_DB != 0 {
            if let Some(ref db) = self.database {
                buf.extend_from_slice(db.as_bytes());
            }
            buf.put_u8(0);
        }

        // Auth plugin name
        if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            buf.extend_from_slice(self.auth_plugin_name.as_bytes());
            buf.put_u8(0);
        }

        Packet::new(sequence_id, buf.freeze())
    }
}

/// Auth switch request (server -> client, 0xFE during authentication)
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub plugin_data: Vec<u8>,
}

impl AuthSwitchRequest {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.first() != Some(&0xFE) {
            return None;
        }
        let buf = &payload[1..];
        let null_pos = buf.iter().position(|&b| b == 0)?;
        let plugin_name = String::from_utf8_lossy(&buf[..null_pos]).to_string();

        // Salt is null-terminated on the wire
        let mut plugin_data = buf[null_pos + 1..].to_vec();
        if plugin_data.last() == Some(&0) {
            plugin_data.pop();
        }

        Some(Self {
            plugin_name,
            plugin_data,
        })
    }
}

/// Compute mysql_native_password auth response
pub fn compute_auth_response(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    // SHA1(password)
    let hash1 = Sha1::digest(password.as_bytes());
    // SHA1(SHA1(password))
    let hash2 = Sha1::digest(hash1);

    // SHA1(auth_data + SHA1(SHA1(password)))
    let mut hasher = Sha1::new();
    hasher.update(auth_data);
    hasher.update(hash2);
    let hash3 = hasher.finalize();

    hash1
        .iter()
        .zip(hash3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// ERR packet
#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    pub fn new(error_code: u16, sql_state: &str, error_message: &str) -> Self {
        Self {
            error_code,
            sql_state: sql_state.to_string(),
            error_message: error_message.to_string(),
        }
    }

    /// Parse from packet payload
    pub fn parse(payload: &[u8], capabilities: u32) -> Option<Self> {
        if payload.is_empty() || payload[0] != 0xFF {
            return None;
        }

        let mut buf = &payload[1..];
        if buf.len() < 2 {
            return None;
        }

        let error_code = buf.get_u16_le();

        let (sql_state, error_message) =
            if capabilities & CLIENT_PROTOCOL_41 != 0 && !buf.is_empty() && buf[0] == b'#' {
                buf.advance(1);
                if buf.len() >= 5 {
                    let sql_state = String::from_utf8_lossy(&buf[..5]).to_string();
                    buf.advance(5);
                    let error_message = String::from_utf8_lossy(buf).to_string();
                    (sql_state, error_message)
                } else {
                    ("HY000".to_string(), String::from_utf8_lossy(buf).to_string())
                }
            } else {
                ("HY000".to_string(), String::from_utf8_lossy(buf).to_string())
            };

        Some(Self {
            error_code,
            sql_state,
            error_message,
        })
    }
}

/// Check if packet is OK packet
pub fn is_ok_packet(payload: &Bytes) -> bool {
    !payload.is_empty() && payload[0] == 0x00
}

/// Check if packet is ERR packet
pub fn is_err_packet(payload: &Bytes) -> bool {
    !payload.is_empty() && payload[0] == 0xFF
}

/// Check if packet is EOF packet
pub fn is_eof_packet(payload: &Bytes) -> bool {
    !payload.is_empty() && payload[0] == 0xFE && payload.len() < 9
}
