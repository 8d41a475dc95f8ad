//! Per-server periodic sender (spec §4.5): ticks at `poll_period`, staggered
//! at startup, with an adaptive receive timeout and a startup burst.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::counter::CounterOracle;
use crate::error::Result;
use crate::ntp::{LeapIndicator, NtpPacket};
use crate::stamp::{ReqHalf, RespHalf, StampMeta, StampQueue};
use crate::time::NtpTimestamp;

/// Packets emitted at startup before settling into the steady `poll_period`
/// cadence, matching ntpd's own burst convention (spec §4.5).
pub const NTP_BURST: u32 = 8;
/// Interval between burst packets, in seconds (spec §4.5; concrete value not
/// pinned by the spec — chosen to match ntpd's default burst cadence).
pub const BURST_DELAY_SECS: f64 = 2.0;

const RCVTIMEO_INIT_SECS: f64 = 0.9;
const RCVTIMEO_MIN_SECS: f64 = 0.005;

pub struct Trigger {
    server: usize,
    socket: UdpSocket,
    poll_period: u64,
    rcvtimeo: f64,
    last_nonce: NtpTimestamp,
    burst_remaining: u32,
    queue: Arc<Mutex<StampQueue>>,
    stop: Arc<AtomicBool>,
    counter: Arc<dyn CounterOracle>,
}

impl Trigger {
    pub fn new(
        server: usize,
        socket: UdpSocket,
        poll_period: u64,
        queue: Arc<Mutex<StampQueue>>,
        stop: Arc<AtomicBool>,
        counter: Arc<dyn CounterOracle>,
    ) -> Trigger {
        Trigger {
            server,
            socket,
            poll_period,
            rcvtimeo: RCVTIMEO_INIT_SECS,
            last_nonce: NtpTimestamp(0),
            burst_remaining: NTP_BURST,
            queue,
            stop,
            counter,
        }
    }

    /// Stagger offset using this trigger's own `poll_period` (spec §4.5):
    /// `0.5 + poll_period * s / (2*n)` seconds.
    pub fn startup_stagger_for(&self, n: usize) -> Duration {
        let secs = 0.5 + (self.poll_period as f64 * self.server as f64) / (2.0 * n.max(1) as f64);
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn next_nonce(&mut self) -> NtpTimestamp {
        let candidate = NtpTimestamp::from_secs(crate::time::Secs::now());
        self.last_nonce = if candidate == self.last_nonce { candidate.next() } else { candidate };
        self.last_nonce
    }

    fn tick_period(&self) -> Duration {
        if self.burst_remaining > 0 {
            Duration::from_secs_f64(BURST_DELAY_SECS.min(self.poll_period as f64))
        } else {
            Duration::from_secs(self.poll_period)
        }
    }

    fn max_attempts(&self) -> u32 {
        if self.rcvtimeo <= 0.0 {
            return 1;
        }
        (3.0_f64).min((self.poll_period as f64 / self.rcvtimeo).floor() - 1.0).max(1.0) as u32
    }

    /// One trigger cycle: send a request, wait for (and pair) the response,
    /// update the adaptive timeout, and hand the completed stamp to the
    /// matching queue.
    pub fn tick(&mut self, server_addr: std::net::SocketAddr) -> Result<()> {
        let nonce = self.next_nonce();
        let ta = self.counter.read_counter();
        self.queue.lock().expect("stamp queue mutex poisoned").insert_req(ReqHalf { ta, nonce: nonce.0, server: self.server });

        let request = NtpPacket::request(nonce);
        self.socket.send_to(&request.encode(), server_addr)?;

        let attempts = self.max_attempts();
        self.socket.set_read_timeout(Some(Duration::from_secs_f64(self.rcvtimeo.max(RCVTIMEO_MIN_SECS))))?;

        for _ in 0..attempts {
            let mut buf = [0u8; crate::ntp::NTP_PACKET_LEN + 32];
            match self.socket.recv(&mut buf) {
                Ok(n) => {
                    if let Some(resp) = NtpPacket::decode(&buf[..n]) {
                        if resp.origin_timestamp == nonce {
                            let tf = self.counter.read_counter();
                            self.on_response(resp, tf);
                            if self.burst_remaining > 0 {
                                self.burst_remaining -= 1;
                            }
                            return Ok(());
                        }
                        // Stale response for a previous nonce: drain one more read and retry.
                        continue;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn on_response(&mut self, resp: NtpPacket, tf: u64) {
        let meta = StampMeta {
            server: self.server,
            stratum: resp.stratum,
            leap_indicator: leap_bits(resp.leap),
            refid: resp.refid,
            ttl: 64,
            nonce: resp.origin_timestamp.0,
        };
        self.queue.lock().expect("stamp queue mutex poisoned").insert_resp(RespHalf {
            tb: resp.receive_secs(),
            te: resp.transmit_secs(),
            tf,
            meta,
        });
    }

    /// Adapt `RCVTIMEO` from the latest accepted round trip (spec §4.5):
    /// `min(1, 2*min_rtt)`, bounded to `[5ms, 0.7*poll_period]`.
    pub fn update_rcvtimeo(&mut self, min_rtt_secs: f64) {
        let target = (2.0 * min_rtt_secs).min(1.0);
        self.rcvtimeo = target.max(RCVTIMEO_MIN_SECS).min(0.7 * self.poll_period as f64);
    }

    pub fn run(&mut self, server_addr: std::net::SocketAddr) {
        while !self.stop.load(Ordering::Relaxed) {
            if let Err(err) = self.tick(server_addr) {
                tracing::warn!(server = self.server, error = %err, "trigger cycle failed");
            }
            std::thread::sleep(self.tick_period());
        }
    }
}

fn leap_bits(li: LeapIndicator) -> u8 {
    match li {
        LeapIndicator::NoWarning => 0,
        LeapIndicator::InsertSecond => 1,
        LeapIndicator::DeleteSecond => 2,
        LeapIndicator::Unsynchronized => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::FakeOracle;

    fn trigger(server: usize, poll_period: u64) -> Trigger {
        let stop = Arc::new(AtomicBool::new(false));
        let queue = Arc::new(Mutex::new(StampQueue::new(8)));
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let counter: Arc<dyn CounterOracle> = Arc::new(FakeOracle::new(0));
        Trigger::new(server, socket, poll_period, queue, stop, counter)
    }

    #[test]
    fn max_attempts_respects_poll_period_ratio() {
        let mut trigger = trigger(0, 16);
        trigger.rcvtimeo = 0.9;
        assert!(trigger.max_attempts() >= 1);
        trigger.update_rcvtimeo(0.01);
        assert!(trigger.rcvtimeo >= RCVTIMEO_MIN_SECS);
    }

    #[test]
    fn startup_stagger_scales_with_server_index() {
        let t0 = trigger(0, 16);
        let t1 = trigger(1, 16);
        assert!(t1.startup_stagger_for(2) > t0.startup_stagger_for(2));
    }
}
