use thiserror::Error;

/// Everything that can go wrong while synchronizing, gating, or publishing a clock.
///
/// The bidirectional estimator itself never returns this type: a quality or
/// sanity failure is recorded as a status bit on [`crate::algo::RadData`] and
/// the previous estimate is retained. `ClockError` is for the layers around
/// the estimator — the gate, the trigger, configuration and I/O — where a
/// stamp, a server, or the whole daemon may need to stop.
#[derive(Debug, Error)]
pub enum ClockError {
    /// A stamp failed the sanity gate of spec §3 (non-causal timestamps, zero
    /// timestamps, duplicate `Ta`, or an RTT below the floor) and was dropped
    /// before reaching the algorithm.
    #[error("server {server}: insane stamp at index {stamp_i}: {reason}")]
    InsaneStamp {
        server: usize,
        stamp_i: u64,
        reason: &'static str,
    },

    /// A point-error or weighted-error estimate exceeded its quality
    /// threshold; the previous estimate was kept.
    #[error("server {server}: quality failure in {field}")]
    QualityFail { server: usize, field: &'static str },

    /// An otherwise-accepted estimate differed from the previous one by more
    /// than its sanity band, or a `qual_warning` was outstanding for this
    /// stamp; the update was not adopted.
    #[error("server {server}: sanity failure in {field}")]
    SanityFail { server: usize, field: &'static str },

    /// No accepted update for more than `10 * poll_period` worth of elapsed
    /// counter time.
    #[error("server {server}: starving, no update since {last_changed} counts")]
    Starving { server: usize, last_changed: u64 },

    /// The hardware counter was replaced under the daemon (wrap or reset
    /// inconsistent with `max_cycles`). Fatal to the affected clock.
    #[error("server {server}: counter changed under the daemon")]
    CounterChanged { server: usize },

    /// Socket, file, or other OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file or CLI argument could not be parsed, or named an
    /// unsupported combination.
    #[error("configuration error: {0}")]
    Config(String),

    /// No recovery is possible; the daemon should shut down.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, ClockError>;
