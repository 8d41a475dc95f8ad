//! The shared-memory segment (spec §6): a lock-free double-buffered region
//! the publisher writes and out-of-process readers poll without locking.
//!
//! This models the region itself (the header, the two data/error slots, and
//! the generation protocol) as an in-process `Arc<Sms>`. Actually backing it
//! with `shm_open`/`mmap` so a separate process can attach is host glue out
//! of scope here (spec §1 Non-goals); the protocol below is exactly the one
//! that glue would run over real shared memory.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::algo::{RadData, RadError};

pub const SMS_VERSION: u32 = 1;

struct Slot {
    data: UnsafeCell<RadData>,
    error: UnsafeCell<RadError>,
}

// SAFETY: access to a `Slot` is serialized by the publish/read protocol in
// `Sms` — the writer only ever touches the slot that `data_off` does not
// currently point to, so a slot is never written and read concurrently.
unsafe impl Sync for Slot {}

pub struct Sms {
    version: u32,
    gen: AtomicU32,
    data_off: AtomicU32,
    slots: [Slot; 2],
}

impl Sms {
    pub fn new() -> Arc<Sms> {
        Arc::new(Sms {
            version: SMS_VERSION,
            gen: AtomicU32::new(0),
            data_off: AtomicU32::new(0),
            slots: [
                Slot { data: UnsafeCell::new(RadData::default()), error: UnsafeCell::new(RadError::default()) },
                Slot { data: UnsafeCell::new(RadData::default()), error: UnsafeCell::new(RadError::default()) },
            ],
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Single-producer write (spec §6 writer protocol): write the
    /// not-currently-visible slot, clear `gen`, flip which slot is visible,
    /// then publish a fresh nonzero generation.
    pub fn publish(&self, data: RadData, error: RadError) {
        let current = self.data_off.load(Ordering::Acquire);
        let old = 1 - current;
        // SAFETY: `old` is not the slot any reader can currently be reading.
        unsafe {
            *self.slots[old as usize].data.get() = data;
            *self.slots[old as usize].error.get() = error;
        }
        let prev_gen = self.gen.swap(0, Ordering::AcqRel);
        self.data_off.store(old, Ordering::Release);
        let next_gen = prev_gen.wrapping_add(1);
        self.gen.store(if next_gen == 0 { 1 } else { next_gen }, Ordering::Release);
    }

    /// Lock-free reader protocol (spec §6, property §8.7): read `gen`, read
    /// the slot, read `gen` again; retry unless both reads agree and are
    /// nonzero.
    pub fn read(&self) -> (RadData, RadError) {
        loop {
            let g1 = self.gen.load(Ordering::Acquire);
            if g1 == 0 {
                std::hint::spin_loop();
                continue;
            }
            let idx = self.data_off.load(Ordering::Acquire) as usize;
            // SAFETY: `idx` names the slot currently visible to readers; the
            // writer cannot mutate it until it has already flipped away.
            let data = unsafe { *self.slots[idx].data.get() };
            let error = unsafe { *self.slots[idx].error.get() };
            let g2 = self.gen.load(Ordering::Acquire);
            if g1 == g2 {
                return (data, error);
            }
        }
    }

    /// Non-blocking variant of [`Sms::read`]: `None` before the first publish
    /// or on a torn read, instead of spinning.
    pub fn try_read(&self) -> Option<(RadData, RadError)> {
        let g1 = self.gen.load(Ordering::Acquire);
        if g1 == 0 {
            return None;
        }
        let idx = self.data_off.load(Ordering::Acquire) as usize;
        let data = unsafe { *self.slots[idx].data.get() };
        let error = unsafe { *self.slots[idx].error.get() };
        let g2 = self.gen.load(Ordering::Acquire);
        if g1 == g2 { Some((data, error)) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Secs;

    #[test]
    fn read_before_first_publish_is_none() {
        let sms = Sms::new();
        assert!(sms.try_read().is_none());
    }

    #[test]
    fn read_observes_latest_publish() {
        let sms = Sms::new();
        for last_changed in 1..=5u64 {
            let data = RadData { last_changed, ..RadData::default() };
            sms.publish(data, RadError::default());
        }
        let (data, _) = sms.read();
        assert_eq!(data.last_changed, 5);
    }

    #[test]
    fn concurrent_reads_never_see_a_torn_publish() {
        let sms = Sms::new();
        let writer_sms = Arc::clone(&sms);
        let writer = std::thread::spawn(move || {
            for i in 1..=2000u64 {
                let data = RadData { last_changed: i, next_expected: i, ca: Secs::from_f64_secs(i as f64), ..RadData::default() };
                let error = RadError { min_rtt: i as f64, ..RadError::default() };
                writer_sms.publish(data, error);
            }
        });

        let reader_sms = Arc::clone(&sms);
        let reader = std::thread::spawn(move || {
            for _ in 0..5000 {
                if let Some((data, error)) = reader_sms.try_read() {
                    assert_eq!(data.last_changed, data.next_expected);
                    assert_eq!(data.ca.as_f64(), data.last_changed as f64);
                    assert_eq!(error.min_rtt, data.last_changed as f64);
                }
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();
    }
}
