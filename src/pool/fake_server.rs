//! Scripted in-process MySQL server for connection and pool tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

use crate::config::BackendConfig;
use crate::protocol::{capabilities, command, ErrPacket, Packet, PacketCodec};

#[derive(Default)]
struct Script {
    responses: HashMap<String, Vec<Packet>>,
    auth_switch: bool,
    deny_auth: bool,
    hang_up_after_query: bool,
    seen_users: Vec<String>,
}

pub(crate) struct FakeServer {
    port: u16,
    script: Arc<Mutex<Script>>,
    connections: Arc<AtomicUsize>,
}

impl FakeServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let script = Arc::new(Mutex::new(Script::default()));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_script = script.clone();
        let accept_count = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_count.fetch_add(1, Ordering::SeqCst);
                let script = accept_script.clone();
                tokio::spawn(serve(Framed::new(stream, PacketCodec), script));
            }
        });

        Self {
            port,
            script,
            connections,
        }
    }

    pub(crate) fn respond(self, sql: &str, packets: Vec<Packet>) -> Self {
        self.script.lock().responses.insert(sql.to_string(), packets);
        self
    }

    pub(crate) fn with_auth_switch(self) -> Self {
        self.script.lock().auth_switch = true;
        self
    }

    pub(crate) fn deny_auth(self) -> Self {
        self.script.lock().deny_auth = true;
        self
    }

    /// Close each connection right after its first query, like a server
    /// whose wait_timeout expired. Unscripted queries get no reply at all.
    pub(crate) fn hang_up_after_query(self) -> Self {
        self.script.lock().hang_up_after_query = true;
        self
    }

    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn seen_users(&self) -> Vec<String> {
        self.script.lock().seen_users.clone()
    }

    pub(crate) fn backend(&self) -> BackendConfig {
        BackendConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            user: "probe".to_string(),
            password: "secret".to_string(),
            database: Some("information_schema".to_string()),
        }
    }
}

fn handshake() -> Packet {
    let caps = capabilities::DEFAULT_CAPABILITIES;
    let mut buf = BytesMut::new();
    buf.put_u8(10);
    buf.extend_from_slice(b"8.0.36-fake\0");
    buf.put_u32_le(7);
    buf.extend_from_slice(b"01234567");
    buf.put_u8(0);
    buf.put_u16_le((caps & 0xFFFF) as u16);
    buf.put_u8(0x21);
    buf.put_u16_le(0x0002);
    buf.put_u16_le((caps >> 16) as u16);
    buf.put_u8(21);
    buf.extend_from_slice(&[0u8; 10]);
    buf.extend_from_slice(b"89abcdefghij\0");
    buf.extend_from_slice(b"caching_sha2_password\0");
    Packet::new(0, buf.freeze())
}

fn ok(seq: u8) -> Packet {
    Packet::new(seq, &b"\x00\x00\x00\x02\x00\x00\x00"[..])
}

fn err(seq: u8, code: u16, state: &str, message: &str) -> Packet {
    let mut buf = BytesMut::new();
    buf.put_u8(0xFF);
    buf.put_u16_le(code);
    buf.put_u8(b'#');
    buf.extend_from_slice(state.as_bytes());
    buf.extend_from_slice(message.as_bytes());
    Packet::new(seq, buf.freeze())
}

fn username(payload: &[u8]) -> String {
    let rest = &payload[32..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    String::from_utf8_lossy(&rest[..end]).to_string()
}

async fn serve(mut framed: Framed<tokio::net::TcpStream, PacketCodec>, script: Arc<Mutex<Script>>) {
    if framed.send(handshake()).await.is_err() {
        return;
    }
    let Some(Ok(response)) = framed.next().await else {
        return;
    };
    let (auth_switch, deny_auth) = {
        let mut script = script.lock();
        script.seen_users.push(username(&response.payload));
        (script.auth_switch, script.deny_auth)
    };

    let mut seq = response.sequence_id.wrapping_add(1);
    if auth_switch {
        let mut buf = BytesMut::new();
        buf.put_u8(0xFE);
        buf.extend_from_slice(b"mysql_native_password\0");
        buf.extend_from_slice(b"abcdefghijklmnopqrst\0");
        if framed.send(Packet::new(seq, buf.freeze())).await.is_err() {
            return;
        }
        let Some(Ok(scramble)) = framed.next().await else {
            return;
        };
        seq = scramble.sequence_id.wrapping_add(1);
    }

    let auth_reply = if deny_auth {
        err(seq, 1045, "28000", "Access denied for user 'probe'")
    } else {
        ok(seq)
    };
    if framed.send(auth_reply).await.is_err() || deny_auth {
        return;
    }

    while let Some(Ok(packet)) = framed.next().await {
        let Some(&cmd) = packet.payload.first() else {
            return;
        };
        match cmd {
            command::COM_QUIT => return,
            command::COM_PING => {
                if framed.send(ok(1)).await.is_err() {
                    return;
                }
            }
            command::COM_QUERY => {
                let sql = String::from_utf8_lossy(&packet.payload[1..]).to_string();
                let (scripted, hang_up) = {
                    let script = script.lock();
                    (script.responses.get(&sql).cloned(), script.hang_up_after_query)
                };
                if hang_up && scripted.is_none() {
                    return;
                }
                let packets = scripted.unwrap_or_else(|| {
                    let parsed = ErrPacket::new(1064, "42000", "You have an error in your SQL syntax");
                    vec![err(1, parsed.error_code, &parsed.sql_state, &parsed.error_message)]
                });
                for packet in packets {
                    if framed.send(packet).await.is_err() {
                        return;
                    }
                }
                if hang_up {
                    return;
                }
            }
            _ => {
                if framed.send(err(1, 1047, "08S01", "Unknown command")).await.is_err() {
                    return;
                }
            }
        }
    }
}
