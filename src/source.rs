//! Stamp sources (spec §6 `synchronization_type`): where a server's raw
//! half-stamps come from. Only the in-daemon NTP trigger path and ASCII
//! replay are implemented here; packet-capture, VM, and Xen transports are
//! out of scope (spec §1 Non-goals) and return `Unsupported`.

use std::io::BufReader;
use std::net::UdpSocket;

use crate::ascii::AsciiReader;
use crate::error::{ClockError, Result};
use crate::stamp::Stamp;

/// One upstream feed of bidirectional stamps for a single server.
pub trait StampSource: Send {
    /// Block until the next stamp is available, or `Ok(None)` on clean EOF
    /// (only possible for a replay source).
    fn next_stamp(&mut self) -> Result<Option<Stamp>>;
}

/// Live querying over UDP via [`crate::trigger::Trigger`] (spec §4.5). The
/// trigger itself owns the socket and matching queue; this adapter just
/// drains completed stamps from it.
pub struct LiveNtp {
    queue: std::sync::Arc<std::sync::Mutex<crate::stamp::StampQueue>>,
}

impl LiveNtp {
    pub fn new(queue: std::sync::Arc<std::sync::Mutex<crate::stamp::StampQueue>>) -> LiveNtp {
        LiveNtp { queue }
    }
}

impl StampSource for LiveNtp {
    fn next_stamp(&mut self) -> Result<Option<Stamp>> {
        loop {
            if let Some(stamp) = self.queue.lock().expect("stamp queue mutex poisoned").pop_full() {
                return Ok(Some(stamp));
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }
}

/// Replay stamps previously logged by [`crate::ascii::AsciiWriter`]
/// (spec §6 `sync_in_ascii`), for offline testing and scenario replay.
pub struct AsciiReplay {
    reader: AsciiReader<BufReader<std::fs::File>>,
}

impl AsciiReplay {
    pub fn open(path: &std::path::Path) -> Result<AsciiReplay> {
        let file = std::fs::File::open(path)?;
        Ok(AsciiReplay { reader: AsciiReader::new(BufReader::new(file))? })
    }
}

impl StampSource for AsciiReplay {
    fn next_stamp(&mut self) -> Result<Option<Stamp>> {
        self.reader.next_stamp()
    }
}

/// Raw packet capture (`sync_in_pcap`). Out of scope (spec §1): implementers
/// provide a thin adapter to their platform's capture library.
pub struct LivePcap;

impl StampSource for LivePcap {
    fn next_stamp(&mut self) -> Result<Option<Stamp>> {
        Err(ClockError::Fatal("pcap capture source is not implemented".into()))
    }
}

/// VM/Xen/VMware guest transports (`vm_udp`, `xen`, `vmware`). Out of scope
/// (spec §1): these piggyback on hypervisor-specific channels.
pub struct UnsupportedTransport {
    pub kind: &'static str,
}

impl StampSource for UnsupportedTransport {
    fn next_stamp(&mut self) -> Result<Option<Stamp>> {
        Err(ClockError::Fatal(format!("transport '{}' is not implemented", self.kind)))
    }
}

/// A bound UDP socket a [`crate::trigger::Trigger`] sends requests from and
/// receives responses on, per server.
pub fn bind_client_socket() -> Result<UdpSocket> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    Ok(socket)
}
