//! Per-server estimator state (spec §3, §4.3).

use crate::history::History;
use crate::stamp::Stamp;
use crate::time::Secs;

use super::output::Status;
use super::params::{MetaParams, Thresholds, Windows};

/// Snapshot of the stamp used as a period-estimation reference, along with
/// the point error and RTT baseline in effect when it was captured.
#[derive(Clone, Copy, Debug)]
pub struct PstampRecord {
    pub stamp_i: u64,
    pub stamp: Stamp,
    pub perr: f64,
    pub rtt_hat: u64,
}

/// Running mean/variance accumulator, kept both over the full top window and
/// over the current half-window ("hwin"), per spec §4.3.6.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorStats {
    pub n: u64,
    pub sum: f64,
    pub sq_sum: f64,
    pub n_hwin: u64,
    pub sum_hwin: f64,
    pub sq_sum_hwin: f64,
}

impl ErrorStats {
    pub fn observe(&mut self, value: f64) {
        self.n += 1;
        self.sum += value;
        self.sq_sum += value * value;
        self.n_hwin += 1;
        self.sum_hwin += value;
        self.sq_sum_hwin += value * value;
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 { 0.0 } else { self.sum / self.n as f64 }
    }

    pub fn std_dev(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sq_sum / self.n as f64 - mean * mean).max(0.0).sqrt()
    }

    /// Half-window rollover: the accumulated half becomes the new full
    /// accumulator, and a fresh half starts.
    pub fn roll_half_window(&mut self) {
        self.n = self.n_hwin;
        self.sum = self.sum_hwin;
        self.sq_sum = self.sq_sum_hwin;
        self.n_hwin = 0;
        self.sum_hwin = 0.0;
        self.sq_sum_hwin = 0.0;
    }
}

/// EWMA-smoothed path-penalty aggregate (spec §3; formulas not elaborated
/// beyond "EWMA-smoothed" in the original implementation notes — see
/// DESIGN.md for the smoothing constant chosen here).
#[derive(Clone, Copy, Debug, Default)]
pub struct PathPenalty {
    pub pbase: f64,
    pub pchange: f64,
    pub pquality: f64,
}

const PATH_EWMA_ALPHA: f64 = 1.0 / 16.0;

impl PathPenalty {
    pub fn observe(&mut self, rtt_baseline: f64, quality_signal: f64) {
        let prev_base = self.pbase;
        self.pbase += PATH_EWMA_ALPHA * (rtt_baseline - self.pbase);
        let change = (self.pbase - prev_base).abs();
        self.pchange += PATH_EWMA_ALPHA * (change - self.pchange);
        self.pquality += PATH_EWMA_ALPHA * (quality_signal - self.pquality);
    }
}

/// Per-server sliding-window bidirectional estimator state.
pub struct AlgoState {
    pub server: usize,
    pub poll_period: u64,
    pub meta: MetaParams,
    pub windows: Windows,
    pub thresholds: Thresholds,

    pub stamp_i: u64,
    pub warmed_up: bool,
    pub prev_stamp: Option<Stamp>,

    // --- RTT (spec §4.3.2) ---
    pub rtt_hat: u64,
    pub next_rtt_hat: u64,
    pub rtt_hat_shift: u64,
    pub rtt_hat_shift_thres: u64,
    pub next_boundary: u64,
    pub window_open_i: u64,
    pub lastshift_i: u64,

    // --- warmup phat search (spec §4.3.3) ---
    pub far_i: Option<u64>,
    pub near_i: Option<u64>,

    // --- full phat (spec §4.3.3) ---
    pub phat: f64,
    pub perr: f64,
    pub pstamp: Option<PstampRecord>,
    pub next_pstamp: Option<PstampRecord>,

    // --- plocal (spec §4.3.4) ---
    pub plocal: f64,
    pub plocalerr: f64,
    pub plocal_problem: bool,

    // --- offset (spec §4.3.5) ---
    pub k: Secs,
    pub thetahat: f64,
    pub min_et: f64,
    pub thetastamp_i: u64,
    pub ebound_min_last: f64,
    pub error_bound: f64,

    // --- poll-period transition (spec §4.3.5) ---
    pub poll_transition_th: u64,
    pub poll_ratio: f64,
    pub poll_changed_i: u64,

    // --- histories (spec §3) ---
    pub stamp_hist: History<Stamp>,
    pub rtt_hist: History<u64>,
    pub rtt_hat_hist: History<u64>,
    pub thnaive_hist: History<f64>,

    pub error_stats: ErrorStats,
    pub path: PathPenalty,

    pub status: Status,
    pub last_changed: u64,
    pub next_expected: u64,
}

impl AlgoState {
    /// `init` (spec §4.3): runs on the first stamp for this server.
    pub fn init(server: usize, poll_period: u64, meta: MetaParams, init_phat: f64, stamp: Stamp) -> AlgoState {
        let windows = Windows::compute(poll_period, &meta);
        let thresholds = Thresholds::compute(&meta);
        let capacity = windows.top_win.max(8) as usize;

        let mut stamp_hist = History::new(capacity);
        let mut rtt_hist = History::new(capacity);
        let mut rtt_hat_hist = History::new(capacity);
        let thnaive_hist = History::new(capacity);

        let rtt = stamp.rtt();
        stamp_hist.add(0, stamp);
        rtt_hist.add(0, rtt);
        rtt_hat_hist.add(0, rtt);

        let k = stamp.tb.add_secs(-init_phat * stamp.ta as f64);

        AlgoState {
            server,
            poll_period,
            meta,
            windows,
            thresholds,
            stamp_i: 0,
            warmed_up: false,
            prev_stamp: Some(stamp),
            rtt_hat: rtt,
            next_rtt_hat: rtt,
            rtt_hat_shift: rtt,
            rtt_hat_shift_thres: u64::MAX,
            next_boundary: windows.top_win / 2,
            window_open_i: 0,
            lastshift_i: 0,
            far_i: Some(0),
            near_i: Some(0),
            phat: init_phat,
            perr: 1.0,
            pstamp: None,
            next_pstamp: None,
            plocal: init_phat,
            plocalerr: 1.0,
            plocal_problem: true,
            k,
            thetahat: 0.0,
            min_et: f64::INFINITY,
            thetastamp_i: 0,
            ebound_min_last: 0.0,
            error_bound: 0.0,
            poll_transition_th: 0,
            poll_ratio: 1.0,
            poll_changed_i: 0,
            stamp_hist,
            rtt_hist,
            rtt_hat_hist,
            thnaive_hist,
            error_stats: ErrorStats::default(),
            path: PathPenalty::default(),
            status: Status::default(),
            last_changed: stamp.tf,
            next_expected: stamp.tf,
        }
    }

    /// Re-derive window widths and thresholds after `poll_period` changes,
    /// ramping the offset window per spec §4.3.5.
    pub fn handle_poll_period_change(&mut self, new_poll_period: u64) {
        if new_poll_period == self.poll_period {
            return;
        }
        self.poll_ratio = new_poll_period as f64 / self.poll_period as f64;
        self.poll_period = new_poll_period;
        self.windows = Windows::compute(new_poll_period, &self.meta);
        self.thresholds = Thresholds::compute(&self.meta);
        self.poll_transition_th = self.windows.offset_win;
        self.poll_changed_i = self.stamp_i;
        self.plocal_problem = true;
        if self.stamp_hist.capacity() < self.windows.top_win as usize {
            let new_cap = self.windows.top_win.max(8) as usize;
            self.stamp_hist.resize(new_cap);
            self.rtt_hist.resize(new_cap);
            self.rtt_hat_hist.resize(new_cap);
            self.thnaive_hist.resize(new_cap);
        }
    }
}
