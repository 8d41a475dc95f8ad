//! Preferred-server selection (spec §4.6): elects which server's `rad_data`
//! gets published.

use crate::algo::{RadData, RadError};

const TRUST_BIT: u8 = 1;
const ERROR_BOUND_CUTOFF_SECS: f64 = 0.010;

#[derive(Clone, Copy, Debug)]
pub struct Candidate {
    pub server: usize,
    pub trust: u8,
    pub data: RadData,
    pub error: RadError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionEvent {
    /// The elected server changed from the previous selection.
    Changed,
    /// Same server elected again, and this stamp belonged to it.
    Updated,
    /// Same server elected again, but this stamp was from another server.
    Unchanged,
}

#[derive(Default)]
pub struct PreferredSelector {
    current: Option<usize>,
}

impl PreferredSelector {
    pub fn new() -> PreferredSelector {
        PreferredSelector { current: None }
    }

    fn min_rtt(candidate: &Candidate) -> f64 {
        candidate.error.min_rtt
    }

    /// Elect a server from the current candidate set (spec §4.6): trusted
    /// and under the error-bound cutoff if any qualify, else the global
    /// minimum-RTT server.
    pub fn select(&mut self, candidates: &[Candidate], stamp_server: usize) -> Option<(usize, SelectionEvent)> {
        if candidates.is_empty() {
            return None;
        }

        let trusted: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.trust & TRUST_BIT != 0 && c.error.error_bound < ERROR_BOUND_CUTOFF_SECS)
            .collect();

        let elected = if !trusted.is_empty() {
            trusted.into_iter().min_by(|a, b| Self::min_rtt(a).partial_cmp(&Self::min_rtt(b)).unwrap()).unwrap()
        } else {
            candidates.iter().min_by(|a, b| Self::min_rtt(a).partial_cmp(&Self::min_rtt(b)).unwrap()).unwrap()
        };

        let event = match self.current {
            Some(prev) if prev == elected.server => {
                if stamp_server == elected.server {
                    SelectionEvent::Updated
                } else {
                    SelectionEvent::Unchanged
                }
            }
            _ => SelectionEvent::Changed,
        };
        self.current = Some(elected.server);
        Some((elected.server, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::Status;
    use crate::time::Secs;

    fn candidate(server: usize, trust: u8, error_bound: f64, min_rtt: f64) -> Candidate {
        Candidate {
            server,
            trust,
            data: RadData { status: Status::default(), ca: Secs::ZERO, ..RadData::default() },
            error: RadError { error_bound, min_rtt, ..RadError::default() },
        }
    }

    #[test]
    fn prefers_lowest_rtt_among_trusted_under_cutoff() {
        let mut selector = PreferredSelector::new();
        let candidates = vec![
            candidate(0, TRUST_BIT, 0.001, 0.050),
            candidate(1, TRUST_BIT, 0.001, 0.010),
            candidate(2, 0, 0.001, 0.001),
        ];
        let (server, event) = selector.select(&candidates, 1).unwrap();
        assert_eq!(server, 1);
        assert_eq!(event, SelectionEvent::Changed);
    }

    #[test]
    fn falls_back_to_global_min_rtt_when_none_trusted() {
        let mut selector = PreferredSelector::new();
        let candidates = vec![candidate(0, 0, 0.001, 0.050), candidate(1, 0, 0.001, 0.010)];
        let (server, _) = selector.select(&candidates, 0).unwrap();
        assert_eq!(server, 1);
    }

    #[test]
    fn reports_updated_vs_unchanged_on_repeat_election() {
        let mut selector = PreferredSelector::new();
        let candidates = vec![candidate(0, TRUST_BIT, 0.001, 0.010)];
        selector.select(&candidates, 0);
        let (_, event_same_stamp) = selector.select(&candidates, 0).unwrap();
        assert_eq!(event_same_stamp, SelectionEvent::Updated);
        let (_, event_other_stamp) = selector.select(&candidates, 5).unwrap();
        assert_eq!(event_other_stamp, SelectionEvent::Unchanged);
    }
}
