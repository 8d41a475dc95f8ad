//! The (optional) kernel feed-forward clock record (spec §4.7, §6): a
//! `KernelClock` implementor pushes [`FfclockEstimate`] into the host's
//! `sysctl`/`ioctl` feed-forward clock, when one exists. On hosts without
//! kernel feed-forward support, [`NoopKernelClock`] is a harmless sink.

use crate::algo::RadData;
use crate::error::Result;
use crate::time::Secs;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// FreeBSD-style `bintime`: whole seconds plus a 64-bit binary fraction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bintime {
    pub secs: u64,
    pub frac: u64,
}

impl Bintime {
    pub fn from_f64_secs(v: f64) -> Bintime {
        let secs = v.floor().max(0.0) as u64;
        let frac = ((v - v.floor()) * (u64::MAX as f64 + 1.0)) as u64;
        Bintime { secs, frac }
    }

    pub fn as_f64(&self) -> f64 {
        self.secs as f64 + self.frac as f64 / (u64::MAX as f64 + 1.0)
    }
}

/// `ffclock_estimate` (spec §6): the kernel's compact snapshot of the
/// affine clock, periodically refreshed by the publisher.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FfclockEstimate {
    pub update_time: Bintime,
    pub update_ffcount: u64,
    /// `phat` as a 64-bit binary fraction: `round(phat * 2^64)`.
    pub period: u64,
    pub errb_abs_ns: u32,
    pub errb_rate_ps_per_s: u32,
    pub status: u32,
    pub secs_to_nextupdate: u32,
    pub leapsec_total: i16,
    pub leapsec_next: i8,
    pub leapsec_expected: u64,
}

const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// Fill a kernel record from published clock data, anchored at counter value
/// `update_ffcount` (spec §4.7, §6).
///
/// `ca` is never collapsed into a single Unix-epoch-magnitude `f64`: the
/// whole-seconds part is carried as an integer throughout, and only the
/// small `phat * update_ffcount` delta (and the sub-second fraction) ever
/// goes through floating point, keeping the round trip in
/// [`fill_radclock_data`] accurate to well under a nanosecond.
pub fn fill_ffclock_estimate(data: &RadData, update_ffcount: u64) -> FfclockEstimate {
    let delta = data.phat * update_ffcount as f64;
    let delta_secs = delta.floor();
    let delta_frac = delta - delta_secs;

    let nanos_sum = data.ca.nanos as f64 + delta_frac * NANOS_PER_SEC;
    let (carry, nanos) = if nanos_sum >= NANOS_PER_SEC {
        (1i64, nanos_sum - NANOS_PER_SEC)
    } else {
        (0, nanos_sum)
    };
    let secs = (data.ca.secs + delta_secs as i64 + carry).max(0) as u64;
    let frac = (nanos / NANOS_PER_SEC * (u64::MAX as f64 + 1.0)) as u64;

    FfclockEstimate {
        update_time: Bintime { secs, frac },
        update_ffcount,
        period: (data.phat * TWO_POW_64).round() as u64,
        errb_abs_ns: (data.ca_err * 1e9).max(0.0).min(u32::MAX as f64) as u32,
        errb_rate_ps_per_s: (data.phat_err * 1e12).max(0.0).min(u32::MAX as f64) as u32,
        status: data.status.bits(),
        secs_to_nextupdate: data.next_expected.saturating_sub(data.last_changed) as u32,
        leapsec_total: data.leapsec_total as i16,
        leapsec_next: data.leapsec_next as i8,
        leapsec_expected: data.leapsec_expected,
    }
}

/// Invert a kernel record back to `(phat, ca)` (spec §8 property 9): must
/// reproduce the values `fill_ffclock_estimate` was built from to within 1ns.
/// Mirrors its integer-seconds-plus-fraction arithmetic rather than going
/// through `Bintime::as_f64`, which would reintroduce the epoch-magnitude
/// precision loss this pair of functions exists to avoid.
pub fn fill_radclock_data(est: &FfclockEstimate) -> (f64, Secs) {
    let phat = est.period as f64 / TWO_POW_64;
    let delta = phat * est.update_ffcount as f64;
    let delta_secs = delta.floor();
    let delta_frac = delta - delta_secs;

    let bintime_nanos = est.update_time.frac as f64 / (u64::MAX as f64 + 1.0) * NANOS_PER_SEC;
    let nanos_diff = bintime_nanos - delta_frac * NANOS_PER_SEC;
    let (borrow, nanos) = if nanos_diff < 0.0 {
        (1i64, nanos_diff + NANOS_PER_SEC)
    } else {
        (0, nanos_diff)
    };
    let secs = est.update_time.secs as i64 - delta_secs as i64 - borrow;

    (phat, Secs { secs, nanos: nanos.round() as u32 })
}

/// A sink for kernel feed-forward clock updates. Implementations talk to the
/// host's actual interface (`sysctlbyname`, an ioctl, `/dev/ffclock`, ...);
/// none of that is in scope here (spec §1 Non-goals).
pub trait KernelClock: Send + Sync {
    fn push(&self, estimate: &FfclockEstimate) -> Result<()>;
}

/// Used when the daemon is configured with `adjust_FFclock = off`, or on a
/// platform with no feed-forward kernel support.
pub struct NoopKernelClock;

impl KernelClock for NoopKernelClock {
    fn push(&self, _estimate: &FfclockEstimate) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::Status;

    #[test]
    fn fill_and_invert_round_trip_within_a_nanosecond() {
        let data = RadData {
            phat: 1.000_000_023e-9,
            ca: Secs::from_f64_secs(1_753_000_000.123_456_789),
            status: Status::default(),
            ..RadData::default()
        };
        let est = fill_ffclock_estimate(&data, 42_000_000_000);
        let (phat, ca) = fill_radclock_data(&est);

        assert!((phat - data.phat).abs() < 1e-18);
        assert!((ca.as_f64() - data.ca.as_f64()).abs() < 1e-9);
    }
}
