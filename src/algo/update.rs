//! Per-stamp update pipeline (spec §4.3.2 – §4.3.7).

use crate::error::{ClockError, Result};
use crate::stamp::Stamp;

use super::output::{RadData, RadError, Status};
use super::params::MetaParams;
use super::state::{AlgoState, PstampRecord};

/// Entry point: runs [`AlgoState::init`] on the first stamp for a server and
/// [`update`] on every stamp after that, folding in the end-of-warmup
/// transition exactly once (spec §4.3.7).
pub fn process_bidir_stamp(
    state: &mut Option<AlgoState>,
    server: usize,
    poll_period: u64,
    meta: MetaParams,
    init_phat: f64,
    stamp: Stamp,
    qual_warning: bool,
) -> Result<(RadData, RadError)> {
    if let Some(st) = state.as_mut() {
        st.handle_poll_period_change(poll_period);
        update(st, stamp, qual_warning)?;
    } else {
        stamp
            .check_sane(None)
            .map_err(|reason| ClockError::InsaneStamp { server, stamp_i: 0, reason })?;
        *state = Some(AlgoState::init(server, poll_period, meta, init_phat, stamp));
    }
    let st = state.as_mut().expect("state set above");
    Ok((build_rad_data(st), build_rad_error(st)))
}

fn update(state: &mut AlgoState, stamp: Stamp, qual_warning: bool) -> Result<()> {
    let stamp_i = state.stamp_i + 1;
    stamp
        .check_sane(state.prev_stamp.as_ref())
        .map_err(|reason| ClockError::InsaneStamp { server: state.server, stamp_i, reason })?;
    // Upstream change (stratum/refid/TTL/LI) only taints this stamp's
    // quality (spec §7); it is not fatal the way a counter replacement is.
    let qual_warning = qual_warning || stamp.upstream_changed(state.prev_stamp.as_ref().expect("prior stamp exists"));

    state.stamp_i = stamp_i;
    let rtt = stamp.rtt();
    state.stamp_hist.add(stamp_i, stamp);
    state.rtt_hist.add(stamp_i, rtt);

    update_rtt(state, stamp_i, rtt);

    if !state.warmed_up {
        warmup_phat_step(state, stamp_i, stamp);
        if stamp_i == state.windows.warmup_win.saturating_sub(1) {
            end_warmup(state);
        }
    } else {
        full_phat_step(state, stamp);
    }

    plocal_step(state, stamp_i, qual_warning);
    thetahat_step(state, stamp_i, stamp, qual_warning);
    error_bound_step(state, stamp);

    state.rtt_hat_hist.add(stamp_i, state.rtt_hat);
    state.prev_stamp = Some(stamp);
    state.last_changed = stamp.tf;
    state.next_expected = stamp.tf + state.poll_period;
    Ok(())
}

/// RTT tracking, half-top-window rollover, and upward-shift detection
/// (spec §4.3.2).
fn update_rtt(state: &mut AlgoState, stamp_i: u64, rtt: u64) {
    if stamp_i == state.next_boundary {
        if let Some(next_pstamp) = state.next_pstamp {
            state.rtt_hat = state.next_rtt_hat;
            state.pstamp = Some(next_pstamp);
        }
        state.error_stats.roll_half_window();
        state.next_rtt_hat = rtt;
        state.next_pstamp = state.stamp_hist.find(stamp_i).map(|stamp| PstampRecord {
            stamp_i,
            stamp,
            perr: state.perr,
            rtt_hat: state.rtt_hat,
        });
        state.window_open_i = stamp_i;
        state.next_boundary += (state.windows.top_win / 2).max(1);
    } else if rtt < state.next_rtt_hat {
        state.next_rtt_hat = rtt;
        if stamp_i - state.window_open_i < state.windows.jsearch_win {
            state.next_pstamp = state.stamp_hist.find(stamp_i).map(|stamp| PstampRecord {
                stamp_i,
                stamp,
                perr: state.perr,
                rtt_hat: state.rtt_hat,
            });
        }
    }

    let shift_win = state.windows.shift_win.max(1);
    let j = stamp_i.saturating_sub(shift_win - 1);
    let prev_j = stamp_i.saturating_sub(1).saturating_sub(shift_win - 1);
    state.rtt_hat_shift = state
        .rtt_hist
        .min_slide(state.rtt_hat_shift, prev_j, j, stamp_i)
        .unwrap_or(rtt);

    if state.warmed_up {
        if state.rtt_hat_shift > state.rtt_hat + state.rtt_hat_shift_thres {
            state.rtt_hat = state.rtt_hat_shift;
            let n = state.windows.offset_win.min(stamp_i - state.lastshift_i + 1);
            state.rtt_hat_hist.rewrite_tail(stamp_i, n, state.rtt_hat);
            state.status.insert(Status::RTT_UPSHIFT);
            state.lastshift_i = stamp_i;
        } else {
            state.status.remove(Status::RTT_UPSHIFT);
            if rtt < state.rtt_hat {
                state.rtt_hat = rtt;
            }
        }
    } else if rtt < state.rtt_hat {
        state.rtt_hat = rtt;
    }
}

/// Warmup-phase phat: far/near argmin-RTT search over the first and second
/// half of the stamps seen so far (spec §4.3.3).
fn warmup_phat_step(state: &mut AlgoState, stamp_i: u64, stamp: Stamp) {
    let mid = stamp_i / 2;
    let (far_i, near_i) = match (state.rtt_hist.min_index(0, mid), state.rtt_hist.min_index(mid + 1, stamp_i)) {
        (Some(f), Some(n)) => (f, n),
        _ => return,
    };
    if state.far_i == Some(far_i) && state.near_i == Some(near_i) {
        return;
    }
    state.far_i = Some(far_i);
    state.near_i = Some(near_i);

    let (far, near) = match (state.stamp_hist.find(far_i), state.stamp_hist.find(near_i)) {
        (Some(f), Some(n)) => (f, n),
        _ => return,
    };
    if near.ta == far.ta {
        return;
    }

    let phat_f = near.tb.diff_secs(far.tb) / (near.ta as f64 - far.ta as f64);
    let phat_b = near.te.diff_secs(far.te) / (near.tf as f64 - far.tf as f64);
    let candidate = 0.5 * (phat_f + phat_b);
    if !candidate.is_finite() || candidate <= 0.0 {
        return;
    }

    let old = state.phat;
    state.phat = candidate;
    state.k = state.k.add_secs((old - candidate) * stamp.ta as f64);
    state.status.insert(Status::PHAT_UPDATED);
}

/// One-shot transition out of warmup (spec §4.3.7): seeds the full-phase
/// reference stamp from the warmup near-point and sets the shift threshold.
fn end_warmup(state: &mut AlgoState) {
    state.warmed_up = true;
    state.status.remove(Status::WARMUP);
    state.perr = state.thresholds.ep;

    if let Some(near_i) = state.near_i {
        if let Some(near) = state.stamp_hist.find(near_i) {
            state.pstamp = Some(PstampRecord { stamp_i: near_i, stamp: near, perr: state.perr, rtt_hat: state.rtt_hat });
        }
    }

    let path_scale = state.rtt_hat as f64 * state.phat;
    state.rtt_hat_shift_thres = if path_scale < 1e-3 {
        (state.thresholds.eshift / state.phat).round() as u64
    } else {
        (3.0 * state.thresholds.eshift / state.phat).round() as u64
    };
}

/// Full-phase phat: two-point estimate against the tracked reference pair,
/// gated by point error, joint error, and a sanity bound (spec §4.3.3).
fn full_phat_step(state: &mut AlgoState, stamp: Stamp) {
    let pstamp = match state.pstamp {
        Some(p) => p,
        None => return,
    };
    if stamp.ta == pstamp.stamp.ta {
        return;
    }

    let phat_f = stamp.tb.diff_secs(pstamp.stamp.tb) / (stamp.ta as f64 - pstamp.stamp.ta as f64);
    let phat_b = stamp.te.diff_secs(pstamp.stamp.te) / (stamp.tf as f64 - pstamp.stamp.tf as f64);
    let candidate = 0.5 * (phat_f + phat_b);
    if !candidate.is_finite() || candidate <= 0.0 {
        return;
    }

    let perr_i = state.phat * (stamp.rtt() as f64 - state.rtt_hat as f64);
    if perr_i.abs() >= state.thresholds.ep {
        state.status.insert(Status::PHAT_SANITY);
        return;
    }

    let dt = stamp.tb.diff_secs(pstamp.stamp.tb).abs().max(1.0);
    let rtt_hat_delta = (state.rtt_hat as i64 - pstamp.rtt_hat as i64).unsigned_abs() as f64;
    let perr_ij = (perr_i.abs() + pstamp.perr.abs() + state.phat * rtt_hat_delta) / dt;
    if !(perr_ij < state.perr || perr_ij < state.thresholds.ep_qual) {
        return;
    }

    let rel_change = ((candidate - state.phat) / state.phat).abs();
    if rel_change > state.thresholds.ep_sanity {
        state.status.insert(Status::PHAT_SANITY);
        return;
    }

    state.status.remove(Status::PHAT_SANITY);
    let old = state.phat;
    state.phat = candidate;
    state.perr = perr_ij;
    state.k = state.k.add_secs((old - candidate) * stamp.ta as f64);
    state.status.insert(Status::PHAT_UPDATED);
}

/// Local-frequency refinement over a short lag, used to project offsets
/// across the (much shorter) offset window (spec §4.3.4).
fn plocal_step(state: &mut AlgoState, stamp_i: u64, qual_warning: bool) {
    let plocal_win = state.windows.plocal_win;
    let wwidth = state.windows.wwidth.max(1);
    if stamp_i < plocal_win + wwidth {
        state.plocal_problem = true;
        return;
    }

    let near_lo = stamp_i.saturating_sub(wwidth - 1);
    let far_hi = stamp_i.saturating_sub(plocal_win);
    let far_lo = far_hi.saturating_sub(wwidth - 1);

    let (near_i, far_i) = match (state.rtt_hist.min_index(near_lo, stamp_i), state.rtt_hist.min_index(far_lo, far_hi)) {
        (Some(n), Some(f)) => (n, f),
        _ => return,
    };
    let (near, far) = match (state.stamp_hist.find(near_i), state.stamp_hist.find(far_i)) {
        (Some(n), Some(f)) => (n, f),
        _ => return,
    };
    if near.ta == far.ta {
        return;
    }

    let plocal_f = near.tb.diff_secs(far.tb) / (near.ta as f64 - far.ta as f64);
    let plocal_b = near.te.diff_secs(far.te) / (near.tf as f64 - far.tf as f64);
    let candidate = 0.5 * (plocal_f + plocal_b);
    if !candidate.is_finite() || candidate <= 0.0 {
        state.plocal_problem = true;
        return;
    }

    let local_err = (candidate - state.phat).abs();
    if qual_warning || local_err > state.thresholds.eplocal_qual {
        state.status.insert(Status::PLOCAL_QUALITY);
        state.plocal_problem = true;
        return;
    }
    if local_err > state.thresholds.eplocal_sanity {
        state.status.insert(Status::PLOCAL_SANITY);
        return;
    }

    state.status.remove(Status::PLOCAL_QUALITY);
    state.status.remove(Status::PLOCAL_SANITY);
    state.plocal = candidate;
    state.plocalerr = local_err;
    state.plocal_problem = false;
}

/// `RTThat_j` for a stamp index in the offset window: the historical
/// `rtt_hat` at the time that stamp was processed, falling back to the
/// current value for the in-flight stamp (`rtt_hat_hist` is only appended
/// for `stamp_i` once the whole pipeline has run, see [`update`]).
fn rtt_hat_at(state: &AlgoState, i: u64, stamp_i: u64) -> u64 {
    if i == stamp_i {
        state.rtt_hat
    } else {
        state.rtt_hat_hist.find(i).unwrap_or(state.rtt_hat)
    }
}

/// Naive offset at window index `i`, re-projected onto the refined local
/// rate once it is trustworthy (spec §4.3.5 `thnaive'_j`).
fn thnaive_at(state: &AlgoState, i: u64) -> Option<f64> {
    if state.warmed_up && !state.plocal_problem {
        let j = state.stamp_hist.find(i)?;
        let c_ta = state.k.add_secs(state.plocal * j.ta as f64);
        let c_tf = state.k.add_secs(state.plocal * j.tf as f64);
        Some(0.5 * (j.tb.diff_secs(c_ta) + j.te.diff_secs(c_tf)))
    } else {
        state.thnaive_hist.find(i)
    }
}

/// Weighted offset estimate over the offset window, Gaussian-decayed by
/// distance from the window's minimum round-trip error (spec §4.3.5).
fn thetahat_step(state: &mut AlgoState, stamp_i: u64, stamp: Stamp, qual_warning: bool) {
    let rate = if state.plocal_problem { state.phat } else { state.plocal };
    let c_ta = state.k.add_secs(rate * stamp.ta as f64);
    let c_tf = state.k.add_secs(rate * stamp.tf as f64);
    let theta_naive = 0.5 * (stamp.tb.diff_secs(c_ta) + stamp.te.diff_secs(c_tf));
    state.thnaive_hist.add(stamp_i, theta_naive);

    let win = state.windows.offset_win.max(1);
    let lo = stamp_i.saturating_sub(win - 1).max(state.rtt_hist.oldest_i());

    let mut min_et = f64::INFINITY;
    for i in lo..=stamp_i {
        if let (Some(rtt), Some(j)) = (state.rtt_hist.find(i), state.stamp_hist.find(i)) {
            let rtt_hat_j = rtt_hat_at(state, i, stamp_i);
            let aging = state.phat * (stamp.tf as f64 - j.tf as f64) * state.meta.best_skm_rate;
            let e = state.phat * (rtt as f64 - rtt_hat_j as f64) / 2.0 + aging;
            if e < min_et {
                min_et = e;
            }
        }
    }
    if !min_et.is_finite() || min_et <= 0.0 {
        min_et = 1e-9;
    }
    state.min_et = min_et;

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for i in lo..=stamp_i {
        if let (Some(rtt), Some(j), Some(theta)) = (state.rtt_hist.find(i), state.stamp_hist.find(i), thnaive_at(state, i)) {
            let rtt_hat_j = rtt_hat_at(state, i, stamp_i);
            let aging = state.phat * (stamp.tf as f64 - j.tf as f64) * state.meta.best_skm_rate;
            let e = state.phat * (rtt as f64 - rtt_hat_j as f64) / 2.0 + aging;
            let w = (-(e / min_et).powi(2)).exp();
            weighted_sum += w * theta;
            weight_total += w;
        }
    }
    if weight_total <= 0.0 {
        return;
    }
    let candidate = weighted_sum / weight_total;

    if qual_warning {
        state.status.insert(Status::OFFSET_QUALITY);
        return;
    }

    let ramping = stamp_i <= state.poll_changed_i + state.poll_transition_th;
    let thetastamp = state.stamp_hist.find(state.thetastamp_i).unwrap_or(stamp);
    let gapsize = state.phat * (stamp.tf as i64 - thetastamp.tf as i64) as f64;
    let sanity_bound = state.thresholds.eoffset_sanity_min + state.thresholds.eoffset_sanity_rate * gapsize;
    if !ramping && (candidate - state.thetahat).abs() > sanity_bound {
        state.status.insert(Status::OFFSET_SANITY);
        return;
    }

    state.status.remove(Status::OFFSET_QUALITY);
    state.status.remove(Status::OFFSET_SANITY);
    state.thetahat = candidate;
    state.thetastamp_i = stamp_i;
    state.ebound_min_last = min_et;
    state.path.observe(state.rtt_hat as f64 * state.phat, min_et);
}

/// Error-bound accounting (spec §4.3.6): ages the last-accepted offset's
/// bound (reseeded at acceptance in [`thetahat_step`]) at the rate implied
/// by `phat` and the elapsed time since.
fn error_bound_step(state: &mut AlgoState, stamp: Stamp) {
    let thetastamp = state.stamp_hist.find(state.thetastamp_i).unwrap_or(stamp);
    let dt = stamp.te.diff_secs(thetastamp.te).max(0.0);
    let error_bound = state.ebound_min_last + state.phat * dt * state.meta.rate_err_bound;
    state.error_stats.observe(error_bound);
    state.error_bound = error_bound;
}

fn build_rad_data(state: &AlgoState) -> RadData {
    let mut data = RadData {
        phat: state.phat,
        phat_err: state.perr,
        phat_local: state.plocal,
        phat_local_err: state.plocalerr,
        ca: state.k.add_secs(state.thetahat),
        ca_err: state.error_stats.mean(),
        last_changed: state.last_changed,
        next_expected: state.next_expected,
        leapsec_total: 0,
        leapsec_next: 0,
        leapsec_expected: 0,
        status: state.status,
    };
    if state.warmed_up {
        data.status.remove(Status::UNSYNC);
    } else {
        data.status.insert(Status::UNSYNC);
    }
    data
}

fn build_rad_error(state: &AlgoState) -> RadError {
    RadError {
        error_bound: state.error_bound,
        error_bound_avg: state.error_stats.mean(),
        error_bound_std: state.error_stats.std_dev(),
        min_rtt: state.rtt_hat as f64 * state.phat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stamp::StampMeta;
    use crate::time::Secs;

    fn meta(nonce: u64) -> StampMeta {
        StampMeta { server: 0, stratum: 2, leap_indicator: 0, refid: 0, ttl: 64, nonce }
    }

    /// A synthetic server whose true wall clock is `true_phat*Ta + true_k`,
    /// reached over a path with fixed one-way delay `owd` seconds.
    fn make_stamp(ta: u64, true_phat: f64, true_k: f64, owd: f64, nonce: u64) -> Stamp {
        let server_time = true_phat * ta as f64 + true_k + owd;
        let tb = Secs::from_f64_secs(server_time);
        let te = Secs::from_f64_secs(server_time + 1e-6);
        let tf = ta + (2.0 * owd / true_phat) as u64;
        Stamp { ta, tb, te, tf, meta: meta(nonce) }
    }

    #[test]
    fn phat_converges_through_warmup_and_full_phase() {
        let true_phat = 1.0e-9;
        let true_k = 1_700_000_000.0;
        let owd = 0.01;
        let meta = MetaParams::GOOD;

        let mut state: Option<AlgoState> = None;
        let mut ta = 1_000_000u64;
        let mut rad = None;
        let mut stamp_count = 0u64;

        loop {
            let stamp = make_stamp(ta, true_phat, true_k, owd, stamp_count + 1);
            let (r, _) = process_bidir_stamp(&mut state, 0, 16, meta, true_phat, stamp, false).unwrap();
            rad = Some(r);
            stamp_count += 1;
            ta += 16;
            let warmup_win = state.as_ref().unwrap().windows.warmup_win;
            if stamp_count > warmup_win * 3 {
                break;
            }
        }

        let rad = rad.unwrap();
        assert!((rad.phat - true_phat).abs() / true_phat < 0.01);
        assert!(!rad.status.contains(Status::WARMUP));

        let last_counter = ta - 16;
        let true_time = true_phat * last_counter as f64 + true_k;
        let estimated = rad.clock_at(last_counter).as_f64();
        assert!((estimated - true_time).abs() < 0.05);
    }
}
