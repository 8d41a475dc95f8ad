//! Published per-server clock data and error bounds (spec §3).

use crate::time::Secs;

bitflags::bitflags! {
    /// Status bits carried in [`RadData::status`] (spec §3).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Status: u32 {
        const WARMUP         = 1 << 0;
        const UNSYNC         = 1 << 1;
        const STARVING       = 1 << 2;
        const RTT_UPSHIFT    = 1 << 3;
        const PHAT_UPDATED   = 1 << 4;
        const PHAT_SANITY    = 1 << 5;
        const PLOCAL_QUALITY = 1 << 6;
        const PLOCAL_SANITY  = 1 << 7;
        const OFFSET_QUALITY = 1 << 8;
        const OFFSET_SANITY  = 1 << 9;
        const SYSCLOCK       = 1 << 10;
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::WARMUP | Status::UNSYNC
    }
}

/// Per-server published clock data, read by the preferred-server selector
/// and copied into the SMS by the publisher.
#[derive(Clone, Copy, Debug)]
pub struct RadData {
    pub phat: f64,
    pub phat_err: f64,
    pub phat_local: f64,
    pub phat_local_err: f64,
    /// Additive offset anchoring the affine map to UTC.
    pub ca: Secs,
    pub ca_err: f64,
    pub last_changed: u64,
    pub next_expected: u64,
    pub leapsec_total: i32,
    pub leapsec_next: i32,
    pub leapsec_expected: u64,
    pub status: Status,
}

impl Default for RadData {
    fn default() -> Self {
        RadData {
            phat: 0.0,
            phat_err: 0.0,
            phat_local: 0.0,
            phat_local_err: 0.0,
            ca: Secs::ZERO,
            ca_err: 0.0,
            last_changed: 0,
            next_expected: 0,
            leapsec_total: 0,
            leapsec_next: 0,
            leapsec_expected: 0,
            status: Status::default(),
        }
    }
}

impl RadData {
    /// Reported UTC at counter value `t`: `C(t) = phat*t + ca`.
    pub fn clock_at(&self, t: u64) -> Secs {
        self.ca.add_secs(self.phat * t as f64)
    }
}

/// Per-server error bound (spec §3).
#[derive(Clone, Copy, Debug, Default)]
pub struct RadError {
    pub error_bound: f64,
    pub error_bound_avg: f64,
    pub error_bound_std: f64,
    pub min_rtt: f64,
}
