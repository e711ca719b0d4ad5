//! Partition lifecycle state machine packed into one atomic word: the high
//! 32 bits hold the state ordinal, the low 16 bits hold the reservation
//! count (§3: "Partition state machine ... atomic reservation counting
//! packed into a single 64-bit word"). Not grounded on a direct teacher
//! equivalent — the teacher has no partition concept — shaped after the
//! packed-word pattern the teacher uses for `PageId` itself
//! (`btree/page_id.rs`) and generalized to a lifecycle + refcount pair.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{GridError, GridResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PartitionState {
    Moving = 0,
    Owning = 1,
    Renting = 2,
    Evicted = 3,
}

impl PartitionState {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => PartitionState::Moving,
            1 => PartitionState::Owning,
            2 => PartitionState::Renting,
            _ => PartitionState::Evicted,
        }
    }
}

fn pack(state: PartitionState, reservations: u16) -> u64 {
    ((state as u64) << 32) | reservations as u64
}

fn unpack(word: u64) -> (PartitionState, u16) {
    (PartitionState::from_u32((word >> 32) as u32), word as u16)
}

/// A reservation held against a partition, preventing it from being
/// evicted out from under an in-flight read/write. Dropping the guard
/// releases the reservation (§9: RAII-guarded resources).
pub struct PartitionReservation<'a> {
    word: &'a AtomicU64,
}

impl<'a> Drop for PartitionReservation<'a> {
    /// Decrements the reservation count; if this is the last reservation
    /// and the partition is `Renting`, attempts eviction as a best effort
    /// (§4.G "release() ... if this brings reservations to zero and state
    /// is RENTING ... a best-effort eviction is attempted"). A lost race
    /// against a concurrent `reserve()` simply leaves the partition
    /// `Renting` for the next release to retry.
    fn drop(&mut self) {
        loop {
            let current = self.word.load(Ordering::SeqCst);
            let (state, count) = unpack(current);
            let new_count = count.saturating_sub(1);
            let next = pack(state, new_count);
            if self
                .word
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                if state == PartitionState::Renting && new_count == 0 {
                    let _ = self.word.compare_exchange(
                        next,
                        pack(PartitionState::Evicted, 0),
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                }
                return;
            }
        }
    }
}

pub struct PartitionStateWord {
    word: AtomicU64,
}

impl PartitionStateWord {
    pub fn new(initial: PartitionState) -> Self {
        Self {
            word: AtomicU64::new(pack(initial, 0)),
        }
    }

    pub fn state(&self) -> PartitionState {
        unpack(self.word.load(Ordering::SeqCst)).0
    }

    pub fn reservations(&self) -> u16 {
        unpack(self.word.load(Ordering::SeqCst)).1
    }

    /// Reserves the partition for an in-flight operation; fails if the
    /// partition is already `Evicted`, since no new operation may observe
    /// an evicted partition's data.
    pub fn reserve(&self) -> GridResult<PartitionReservation<'_>> {
        loop {
            let current = self.word.load(Ordering::SeqCst);
            let (state, count) = unpack(current);
            if state == PartitionState::Evicted {
                return Err(GridError::PartitionState(
                    "cannot reserve an evicted partition".into(),
                ));
            }
            let next = pack(state, count + 1);
            if self
                .word
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(PartitionReservation { word: &self.word });
            }
        }
    }

    fn transition(&self, to: PartitionState, from_allowed: &[PartitionState]) -> GridResult<()> {
        loop {
            let current = self.word.load(Ordering::SeqCst);
            let (state, count) = unpack(current);
            if !from_allowed.contains(&state) {
                return Err(GridError::PartitionState(format!(
                    "cannot transition from {:?} to {:?}",
                    state, to
                )));
            }
            let next = pack(to, count);
            if self
                .word
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    pub fn own(&self) -> GridResult<()> {
        self.transition(PartitionState::Owning, &[PartitionState::Moving])
    }

    pub fn rent(&self) -> GridResult<()> {
        self.transition(PartitionState::Renting, &[PartitionState::Owning])
    }

    /// Evicting requires the reservation count to be zero: the caller must
    /// have drained all in-flight operations first (checked, not enforced,
    /// since holding the lock across a busy-wait would itself be a
    /// liveness bug).
    pub fn evict(&self) -> GridResult<()> {
        let current = self.word.load(Ordering::SeqCst);
        let (state, count) = unpack(current);
        if state != PartitionState::Renting {
            return Err(GridError::PartitionState(
                "can only evict a renting partition".into(),
            ));
        }
        if count != 0 {
            return Err(GridError::PartitionState(
                "cannot evict a partition with outstanding reservations".into(),
            ));
        }
        self.transition(PartitionState::Evicted, &[PartitionState::Renting])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_guard_decrements_on_drop() {
        let w = PartitionStateWord::new(PartitionState::Owning);
        {
            let _g = w.reserve().unwrap();
            assert_eq!(w.reservations(), 1);
        }
        assert_eq!(w.reservations(), 0);
    }

    #[test]
    fn cannot_reserve_evicted_partition() {
        let w = PartitionStateWord::new(PartitionState::Moving);
        w.own().unwrap();
        w.rent().unwrap();
        w.evict().unwrap();
        assert!(w.reserve().is_err());
    }

    #[test]
    fn evict_fails_with_outstanding_reservations() {
        let w = PartitionStateWord::new(PartitionState::Moving);
        w.own().unwrap();
        let guard = w.reserve().unwrap();
        w.rent().unwrap();
        assert!(w.evict().is_err());
        drop(guard);
        assert_eq!(w.state(), PartitionState::Evicted);
    }

    #[test]
    fn release_to_zero_under_renting_evicts_automatically() {
        // §8 scenario 2: reserve twice, rent, release once (no eviction),
        // release again (eviction runs, state becomes EVICTED).
        let w = PartitionStateWord::new(PartitionState::Owning);
        let g1 = w.reserve().unwrap();
        let g2 = w.reserve().unwrap();
        assert_eq!(w.reservations(), 2);
        w.rent().unwrap();
        drop(g1);
        assert_eq!(w.reservations(), 1);
        assert_eq!(w.state(), PartitionState::Renting);
        drop(g2);
        assert_eq!(w.reservations(), 0);
        assert_eq!(w.state(), PartitionState::Evicted);
        assert!(w.reserve().is_err());
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let w = PartitionStateWord::new(PartitionState::Moving);
        assert!(w.rent().is_err());
    }
}
