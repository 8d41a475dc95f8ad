//! Bidirectional stamps and the half-stamp matching queue (spec §3, §4.2).

use crate::time::Secs;

/// Minimum allowed round trip, in counts, below which a stamp is insane (spec §3).
pub const RTT_FLOOR: u64 = 120;

/// Metadata carried alongside a bidirectional stamp, used by the sanity gate
/// and leap-second management to detect upstream changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StampMeta {
    pub server: usize,
    pub stratum: u8,
    pub leap_indicator: u8,
    pub refid: u32,
    pub ttl: u8,
    pub nonce: u64,
}

/// A completed request/response exchange: `(Ta, Tb, Te, Tf)` plus metadata.
#[derive(Clone, Copy, Debug)]
pub struct Stamp {
    /// Counter value at request departure (client).
    pub ta: u64,
    /// Server receive timestamp.
    pub tb: Secs,
    /// Server transmit timestamp.
    pub te: Secs,
    /// Counter value at response arrival (client).
    pub tf: u64,
    pub meta: StampMeta,
}

impl Stamp {
    /// Round trip time in counts, floored at 1 (spec §4.3.2: `max(1, Tf - Ta)`).
    pub fn rtt(&self) -> u64 {
        self.tf.saturating_sub(self.ta).max(1)
    }

    /// Sanity invariants of spec §3, checked against the previous accepted stamp.
    pub fn check_sane(&self, prev: Option<&Stamp>) -> Result<(), &'static str> {
        if self.ta >= self.tf {
            return Err("Ta >= Tf");
        }
        if self.tb.as_f64() > self.te.as_f64() {
            return Err("Tb > Te");
        }
        if self.tf - self.ta < RTT_FLOOR {
            return Err("RTT below floor");
        }
        if let Some(prev) = prev {
            if self.ta <= prev.ta {
                return Err("Ta did not advance");
            }
        }
        Ok(())
    }

    /// True if stratum, refid, TTL, or leap indicator changed since `prev` —
    /// this raises `qual_warning` for the current stamp only (spec §4, §7).
    pub fn upstream_changed(&self, prev: &Stamp) -> bool {
        self.meta.stratum != prev.meta.stratum
            || self.meta.refid != prev.meta.refid
            || self.meta.ttl != prev.meta.ttl
            || self.meta.leap_indicator != prev.meta.leap_indicator
    }
}

/// One side of an incomplete stamp: a request sent, or a response received,
/// not yet paired by nonce.
#[derive(Clone, Copy, Debug)]
pub struct ReqHalf {
    pub ta: u64,
    pub nonce: u64,
    pub server: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct RespHalf {
    pub tb: Secs,
    pub te: Secs,
    pub tf: u64,
    pub meta: StampMeta,
}

/// Multi-producer/single-consumer matching queue (spec §4.2): TRIGGER (and,
/// out of scope here, a capture adapter) insert halves; PROC pops full
/// stamps. Holds at most `capacity` unmatched halves per server; on overflow
/// the oldest unmatched half is dropped (drop-head policy).
pub struct StampQueue {
    capacity: usize,
    reqs: Vec<ReqHalf>,
    full: std::collections::VecDeque<Stamp>,
}

impl StampQueue {
    pub fn new(capacity: usize) -> Self {
        StampQueue {
            capacity,
            reqs: Vec::with_capacity(capacity),
            full: std::collections::VecDeque::new(),
        }
    }

    pub fn insert_req(&mut self, half: ReqHalf) {
        if self.reqs.len() >= self.capacity {
            self.reqs.remove(0);
        }
        self.reqs.push(half);
    }

    /// Pair an arriving response against a pending request by nonce,
    /// enqueuing a full stamp on a match.
    pub fn insert_resp(&mut self, half: RespHalf) {
        if let Some(pos) = self.reqs.iter().position(|r| r.nonce == half.meta.nonce) {
            let req = self.reqs.remove(pos);
            self.full.push_back(Stamp {
                ta: req.ta,
                tb: half.tb,
                te: half.te,
                tf: half.tf,
                meta: half.meta,
            });
        }
        // Unmatched responses (stale, already-drained nonces) are dropped silently.
    }

    pub fn pop_full(&mut self) -> Option<Stamp> {
        self.full.pop_front()
    }

    pub fn pending_reqs(&self) -> usize {
        self.reqs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(server: usize, nonce: u64) -> StampMeta {
        StampMeta {
            server,
            stratum: 2,
            leap_indicator: 0,
            refid: 0,
            ttl: 64,
            nonce,
        }
    }

    #[test]
    fn matches_by_nonce() {
        let mut q = StampQueue::new(4);
        q.insert_req(ReqHalf { ta: 100, nonce: 7, server: 0 });
        assert!(q.pop_full().is_none());
        q.insert_resp(RespHalf {
            tb: Secs::from_f64_secs(10.0),
            te: Secs::from_f64_secs(10.00005),
            tf: 200,
            meta: meta(0, 7),
        });
        let s = q.pop_full().expect("stamp should be matched");
        assert_eq!(s.ta, 100);
        assert_eq!(s.tf, 200);
    }

    #[test]
    fn drop_head_on_overflow() {
        let mut q = StampQueue::new(2);
        q.insert_req(ReqHalf { ta: 1, nonce: 1, server: 0 });
        q.insert_req(ReqHalf { ta: 2, nonce: 2, server: 0 });
        q.insert_req(ReqHalf { ta: 3, nonce: 3, server: 0 });
        assert_eq!(q.pending_reqs(), 2);
        q.insert_resp(RespHalf {
            tb: Secs::ZERO,
            te: Secs::ZERO,
            tf: 10,
            meta: meta(0, 1),
        });
        // nonce 1 was dropped already, so this must not match.
        assert!(q.pop_full().is_none());
    }

    #[test]
    fn rejects_non_causal_stamp() {
        let s = Stamp {
            ta: 100,
            tb: Secs::from_f64_secs(1.0),
            te: Secs::from_f64_secs(1.0001),
            tf: 50,
            meta: meta(0, 1),
        };
        assert!(s.check_sane(None).is_err());
    }

    #[test]
    fn rejects_rtt_below_floor() {
        let s = Stamp {
            ta: 100,
            tb: Secs::from_f64_secs(1.0),
            te: Secs::from_f64_secs(1.0001),
            tf: 100 + 10,
            meta: meta(0, 1),
        };
        assert!(s.check_sane(None).is_err());
    }
}
