//! Leap-second state machine (spec §4.4): tracks an announced leap instant
//! (from an optional leap table, confirmed by upstream LI bits) and exposes
//! the leap-free correction applied to stamps before they reach the
//! estimator.

use crate::stamp::Stamp;

/// A sorted table of announced leap instants: counter value (in the local
/// counter's frame, once anchored) and direction (`+1` insert, `-1` delete).
/// **[SUPPLEMENT]**: the original daemon's compile-time-disabled calendar
/// heuristic is not reproduced; this table is the only source of an
/// *upcoming* leap, populated from `leap_table_path` (spec §6).
#[derive(Clone, Debug, Default)]
pub struct LeapTable {
    entries: Vec<(i64, i8)>,
}

impl LeapTable {
    pub fn parse(text: &str) -> LeapTable {
        let entries = text
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    return None;
                }
                let mut parts = line.split_whitespace();
                let secs: i64 = parts.next()?.parse().ok()?;
                let dir: i8 = parts.next()?.parse().ok()?;
                Some((secs, dir))
            })
            .collect();
        LeapTable { entries }
    }

    /// The next announced leap at or after `after_secs`, if any.
    pub fn next_after(&self, after_secs: i64) -> Option<(i64, i8)> {
        self.entries.iter().copied().filter(|(t, _)| *t >= after_secs).min_by_key(|(t, _)| *t)
    }
}

const LEAP_WARNING_THRESHOLD: u32 = 10;
const LEAP_IMMINENT_WINDOW_SECS: f64 = 2.0 * 3600.0;
const POSTLEAP_FREEZE_STAMPS: u64 = 1000;

/// Per-server leap bookkeeping (spec §4.4 data model).
#[derive(Clone, Debug, Default)]
pub struct LeapState {
    pub leapsec_total: i32,
    pub leapsec_next: i32,
    pub leapsec_expected: u64,
    pub postleap_freeze: u64,
    pub leap_warningcount: u32,
    pub tleap: Option<i64>,
    pub imminent: bool,
}

impl LeapState {
    /// Feed one stamp's metadata through the state machine, using `phat` and
    /// `now_secs` (wall-clock seconds estimate) to project `leapsec_expected`.
    /// Returns the leap-free correction (in seconds) to subtract from `Tb`/`Te`
    /// *before* this call, i.e. the correction in effect going into this stamp.
    pub fn pre_stamp_correction(&self) -> i32 {
        self.leapsec_total
    }

    pub fn observe(&mut self, stamp: &Stamp, phat: f64, now_secs: f64, table: &LeapTable) {
        if self.postleap_freeze > 0 {
            self.postleap_freeze -= 1;
        }

        if stamp.meta.leap_indicator == 1 || stamp.meta.leap_indicator == 2 {
            self.leap_warningcount += 1;
            if self.leapsec_next == 0 {
                self.leapsec_next = if stamp.meta.leap_indicator == 1 { 1 } else { -1 };
            }
        } else {
            self.leap_warningcount = self.leap_warningcount.saturating_sub(1);
        }

        if self.tleap.is_none() {
            if let Some((t, dir)) = table.next_after(now_secs as i64) {
                self.tleap = Some(t);
                if self.leapsec_next == 0 {
                    self.leapsec_next = dir as i32;
                }
            }
        }

        if let Some(tleap) = self.tleap {
            self.leapsec_expected = stamp.tf + ((tleap as f64 - now_secs) / phat).max(0.0) as u64;
            self.imminent =
                self.leap_warningcount > LEAP_WARNING_THRESHOLD && (tleap as f64 - now_secs) < LEAP_IMMINENT_WINDOW_SECS;
        }

        let leap_due = self.tleap.map(|t| now_secs >= t as f64).unwrap_or(false)
            || (self.leapsec_expected != 0 && now_secs >= self.leapsec_expected as f64);

        if leap_due && self.leapsec_next != 0 {
            self.leapsec_total += self.leapsec_next;
            self.leapsec_next = 0;
            self.leapsec_expected = 0;
            self.tleap = None;
            self.leap_warningcount = 0;
            self.imminent = false;
            self.postleap_freeze = POSTLEAP_FREEZE_STAMPS;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stamp::StampMeta;
    use crate::time::Secs;

    fn stamp(li: u8, tf: u64) -> Stamp {
        Stamp {
            ta: tf - 1000,
            tb: Secs::ZERO,
            te: Secs::ZERO,
            tf,
            meta: StampMeta { server: 0, stratum: 2, leap_indicator: li, refid: 0, ttl: 64, nonce: 0 },
        }
    }

    #[test]
    fn accumulates_leap_warning_and_applies_leap() {
        let table = LeapTable::default();
        let mut state = LeapState::default();
        for i in 0..15 {
            state.observe(&stamp(1, 1000 + i), 1e-9, 1000.0, &table);
        }
        assert!(state.leap_warningcount > LEAP_WARNING_THRESHOLD);
        assert_eq!(state.leapsec_next, 1);

        // Force the leap to be due by making `now_secs` exceed the expected instant.
        state.leapsec_expected = 1;
        state.observe(&stamp(1, 2000), 1e-9, 10.0, &table);
        assert_eq!(state.leapsec_total, 1);
        assert_eq!(state.leapsec_next, 0);
        assert_eq!(state.postleap_freeze, POSTLEAP_FREEZE_STAMPS);
    }

    #[test]
    fn leap_table_picks_nearest_future_entry() {
        let table = LeapTable::parse("1000 1\n2000 -1\n");
        assert_eq!(table.next_after(1500), Some((2000, -1)));
        assert_eq!(table.next_after(500), Some((1000, 1)));
    }
}
