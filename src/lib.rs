//! Feed-forward network time synchronization: a sliding-window bidirectional
//! estimator that tracks an affine mapping from a free-running hardware
//! counter to UTC, without ever stepping or disciplining the counter itself.
//!
//! The estimator ([`algo`]) is driven by bidirectional stamps exchanged with
//! one or more upstream NTP servers ([`stamp`], [`ntp`]), matched from raw
//! request/response halves ([`stamp::StampQueue`]). Results are published to
//! a lock-free double-buffered shared-memory segment ([`sms`]) and, where the
//! host kernel supports it, to an in-kernel feed-forward clock record
//! ([`kernel`]).

pub mod algo;
pub mod ascii;
pub mod cfg;
pub mod counter;
pub mod driver;
pub mod error;
pub mod history;
pub mod kernel;
pub mod leap;
pub mod ntp;
pub mod preferred;
pub mod sms;
pub mod source;
pub mod stamp;
pub mod time;
pub mod trigger;

pub use error::{ClockError, Result};
