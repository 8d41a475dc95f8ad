//! Per-server driver (spec §2 `process_stamp`, §4.4, §7): gates a raw stamp
//! through sanity and leap handling, invokes the estimator, and tracks the
//! server's status bits (starvation, counter replacement).

use crate::algo::{process_bidir_stamp, AlgoState, MetaParams, RadData, RadError, Status};
use crate::error::{ClockError, Result};
use crate::leap::{LeapState, LeapTable};
use crate::stamp::Stamp;

/// Consecutive full-phase `phat` sanity failures after which the driver
/// concludes the underlying hardware counter was replaced out from under it
/// (spec §7 "Counter change") rather than merely having a bad network path.
const COUNTER_CHANGE_SANITY_STRIKES: u32 = 8;

pub struct ServerDriver {
    server: usize,
    poll_period: u64,
    meta: MetaParams,
    init_phat: f64,
    algo: Option<AlgoState>,
    leap: LeapState,
    leap_table: LeapTable,
    sanity_strikes: u32,
    trust: u8,
}

impl ServerDriver {
    pub fn new(server: usize, poll_period: u64, meta: MetaParams, init_phat: f64, leap_table: LeapTable) -> ServerDriver {
        ServerDriver {
            server,
            poll_period,
            meta,
            init_phat,
            algo: None,
            leap: LeapState::default(),
            leap_table,
            sanity_strikes: 0,
            trust: 1,
        }
    }

    pub fn trust(&self) -> u8 {
        self.trust
    }

    /// Gate, leap-correct, and feed one stamp through the estimator
    /// (spec §4.4 last bullet, §7). `now_count` is the driver's own current
    /// counter reading, used only for the starvation check.
    pub fn process_stamp(&mut self, raw: Stamp, now_count: u64) -> Result<(RadData, RadError)> {
        let correction = self.leap.pre_stamp_correction();
        let stamp = Stamp {
            tb: raw.tb.add_secs(-(correction as f64)),
            te: raw.te.add_secs(-(correction as f64)),
            ..raw
        };

        let result = process_bidir_stamp(&mut self.algo, self.server, self.poll_period, self.meta, self.init_phat, stamp, false);

        let (data, error) = match result {
            Ok(pair) => pair,
            Err(ClockError::InsaneStamp { .. }) => {
                // Dropped at the gate (spec §7): algo state is untouched, so
                // fall back to whatever was last published for this server.
                return self.snapshot_or_unseen(now_count);
            }
            Err(other) => return Err(other),
        };

        if data.status.contains(Status::PHAT_SANITY) {
            self.sanity_strikes += 1;
            if self.sanity_strikes >= COUNTER_CHANGE_SANITY_STRIKES {
                return Err(ClockError::CounterChanged { server: self.server });
            }
        } else {
            self.sanity_strikes = 0;
        }

        let phat = self.algo.as_ref().map(|s| s.phat).unwrap_or(self.init_phat);
        self.leap.observe(&stamp, phat, stamp.te.as_f64(), &self.leap_table);

        Ok(self.apply_leap_and_starving(data, error, now_count))
    }

    fn snapshot_or_unseen(&mut self, now_count: u64) -> Result<(RadData, RadError)> {
        match &self.algo {
            Some(state) => {
                let data = RadData {
                    status: state.status,
                    last_changed: state.last_changed,
                    phat: state.phat,
                    ..RadData::default()
                };
                Ok(self.apply_leap_and_starving(data, RadError::default(), now_count))
            }
            None => Err(ClockError::Fatal(format!("server {}: no valid stamp yet", self.server))),
        }
    }

    fn apply_leap_and_starving(&self, mut data: RadData, error: RadError, now_count: u64) -> (RadData, RadError) {
        data.leapsec_total = self.leap.leapsec_total;
        data.leapsec_next = self.leap.leapsec_next;
        data.leapsec_expected = self.leap.leapsec_expected;

        let elapsed = now_count.saturating_sub(data.last_changed) as f64;
        let starving = data.phat > 0.0 && elapsed * data.phat > 10.0 * self.poll_period as f64;
        if starving {
            data.status.insert(Status::STARVING);
        } else {
            data.status.remove(Status::STARVING);
        }
        (data, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stamp::StampMeta;
    use crate::time::Secs;

    fn stamp(ta: u64, owd: f64, true_phat: f64, true_k: f64, nonce: u64) -> Stamp {
        let server_time = true_phat * ta as f64 + true_k + owd;
        Stamp {
            ta,
            tb: Secs::from_f64_secs(server_time),
            te: Secs::from_f64_secs(server_time + 1e-6),
            tf: ta + (2.0 * owd / true_phat) as u64,
            meta: StampMeta { server: 0, stratum: 2, leap_indicator: 0, refid: 0, ttl: 64, nonce },
        }
    }

    #[test]
    fn first_stamp_initializes_without_starving() {
        let mut driver = ServerDriver::new(0, 16, MetaParams::GOOD, 1e-9, LeapTable::default());
        let s = stamp(1_000_000, 0.01, 1e-9, 1_700_000_000.0, 1);
        let now_count = s.tf;
        let (data, _) = driver.process_stamp(s, now_count).unwrap();
        assert!(data.status.contains(Status::WARMUP));
        assert!(!data.status.contains(Status::STARVING));
    }

    #[test]
    fn insane_stamp_is_dropped_not_fatal() {
        let mut driver = ServerDriver::new(0, 16, MetaParams::GOOD, 1e-9, LeapTable::default());
        let good = stamp(1_000_000, 0.01, 1e-9, 1_700_000_000.0, 1);
        driver.process_stamp(good, good.tf).unwrap();

        let insane = Stamp { tf: 1_000_000 + 10, ..stamp(1_000_016, 0.01, 1e-9, 1_700_000_000.0, 2) };
        let insane_tf = insane.tf;
        let result = driver.process_stamp(insane, insane_tf);
        assert!(result.is_ok());
    }

    #[test]
    fn long_silence_sets_starving() {
        let mut driver = ServerDriver::new(0, 16, MetaParams::GOOD, 1e-9, LeapTable::default());
        let s = stamp(1_000_000, 0.01, 1e-9, 1_700_000_000.0, 1);
        driver.process_stamp(s, s.tf).unwrap();

        // 20 poll periods later in counter-space, nothing new arrived.
        let much_later = s.tf + 16 * 20 * 1_000_000_000;
        let (data, _) = driver.snapshot_or_unseen(much_later).unwrap();
        assert!(data.status.contains(Status::STARVING));
    }
}
