//! TCP listener table seam.
//!
//! Grounded on `examples/other_examples/…process_manager.rs.rs`
//! (Zarestia-Dev rclone-manager)'s `find_pids_on_port`, which wraps
//! `netstat2::get_sockets_info` with `AddressFamilyFlags::IPV4 | IPV6` and
//! `ProtocolFlags::TCP` and filters by local port and `TcpState::Listen`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerEntry {
    pub port: u16,
    pub pid: u32,
}

/// Seam for "what's listening on TCP right now".
pub trait PortTableReader {
    /// All TCP sockets currently in the `Listen` state.
    fn listeners(&self) -> Vec<ListenerEntry>;
}

/// Production reader backed by `netstat2`.
pub struct SystemPortTableReader;

impl SystemPortTableReader {
    pub fn new() -> Self {
        SystemPortTableReader
    }
}

impl Default for SystemPortTableReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PortTableReader for SystemPortTableReader {
    fn listeners(&self) -> Vec<ListenerEntry> {
        use netstat2::{get_sockets_info, AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, TcpState};

        let af_flags = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
        let proto_flags = ProtocolFlags::TCP;

        let Ok(sockets) = get_sockets_info(af_flags, proto_flags) else {
            return Vec::new();
        };

        let mut entries = Vec::new();
        for socket in sockets {
            if let ProtocolSocketInfo::Tcp(tcp) = socket.protocol_socket_info {
                if tcp.state != TcpState::Listen {
                    continue;
                }
                for pid in socket.associated_pids {
                    entries.push(ListenerEntry { port: tcp.local_port, pid });
                }
            }
        }
        entries
    }
}
