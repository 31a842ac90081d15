//! Startup configuration inputs. Owned here as plain typed structs rather
//! than by the binary that builds them; no text parsing happens in this
//! crate — the embedding daemon is responsible for turning a config file /
//! CLI flags into a `Config` value.

use std::net::IpAddr;

/// One line of the startup interface table.
#[derive(Debug, Clone)]
pub struct InterfaceEntry {
    pub name: String,
    pub name_base: String,
    pub advertised_address: IpAddr,
    pub local_address: IpAddr,
    pub port_min: u16,
    pub port_max: u16,
}

/// Tunable knobs for loop detection, port allocation, and the recv loop.
#[derive(Debug, Clone, Copy)]
pub struct Flags {
    pub port_random_min: u16,
    pub port_random_max: u16,
    pub max_recv_iters: u32,
    pub rtp_loop_protect: bool,
    pub rtp_loop_packets: usize,
    pub rtp_loop_max_count: u32,
    pub rtp_buffer_head_room: usize,
    pub max_rtp_packet_size: usize,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            port_random_min: 6000,
            port_random_max: 14000,
            max_recv_iters: 50,
            rtp_loop_protect: false,
            rtp_loop_packets: 10,
            rtp_loop_max_count: 20,
            rtp_buffer_head_room: 32,
            max_rtp_packet_size: 8192,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub interfaces: Vec<InterfaceEntry>,
    pub flags: Flags,
}

impl Config {
    pub fn from_entries(interfaces: Vec<InterfaceEntry>, flags: Flags) -> Self {
        Config { interfaces, flags }
    }
}
