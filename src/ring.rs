/// Fixed-capacity buffer indexed by sequence number.
///
/// The slot for a sequence is `sequence & (capacity - 1)`, so the capacity must be a
/// power of two. Writing a sequence overwrites whatever was stored `capacity`
/// sequences earlier; callers are responsible for not outrunning their acks.
#[derive(Debug, Clone)]
pub struct SequenceRing<T> {
    slots: Vec<T>,
    mask: u32,
}

impl<T: Default> SequenceRing<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity <= u32::MAX as usize,
            "ring capacity must be a power of two, got {capacity}"
        );
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, T::default);
        Self {
            slots,
            mask: capacity as u32 - 1,
        }
    }
}

impl<T> SequenceRing<T> {
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
    fn slot(&self, sequence: u32) -> usize {
        (sequence & self.mask) as usize
    }
    pub fn get(&self, sequence: u32) -> &T {
        &self.slots[self.slot(sequence)]
    }
    pub fn get_mut(&mut self, sequence: u32) -> &mut T {
        let slot = self.slot(sequence);
        &mut self.slots[slot]
    }
}

impl SequenceRing<Vec<u8>> {
    /// Copies `bytes` into the slot for `sequence`, reusing its allocation.
    pub fn store(&mut self, sequence: u32, bytes: &[u8]) {
        let slot = self.get_mut(sequence);
        slot.clear();
        slot.extend_from_slice(bytes);
    }
}

/// Picks the sequence to retransmit out of `(acked, latest]`, with `roll` counting picks.
///
/// Every other pick is the oldest unacknowledged sequence and the rest cycle through the
/// newer ones. A periodic loss pattern can then never starve the oldest sequence, which
/// the receiver must get before it can apply anything newer.
pub fn resend_sequence(acked: u32, latest: u32, roll: u32) -> u32 {
    let newer = latest - acked - 1;
    if newer == 0 || roll % 2 == 0 {
        return acked + 1;
    }
    acked + 2 + (roll / 2) % newer
}

impl<T> std::ops::Index<u32> for SequenceRing<T> {
    type Output = T;

    fn index(&self, sequence: u32) -> &Self::Output {
        self.get(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_by_mask() {
        let mut ring = SequenceRing::<u32>::new(4);
        for seq in 1..=6 {
            *ring.get_mut(seq) = seq * 10;
        }
        assert_eq!(ring[5], 50);
        assert_eq!(ring[1], 50);
        assert_eq!(ring[2], 60);
        assert_eq!(ring[3], 30);
        assert_eq!(ring.capacity(), 4);
    }

    #[test]
    fn store_replaces_slot_contents() {
        let mut ring = SequenceRing::<Vec<u8>>::new(2);
        ring.store(1, b"long message");
        ring.store(3, b"short");
        assert_eq!(ring[1], b"short".to_vec());
    }

    #[test]
    fn resend_alternates_oldest_with_the_rest() {
        let picks: Vec<u32> = (0..8).map(|roll| resend_sequence(10, 14, roll)).collect();
        assert_eq!(picks, vec![11, 12, 11, 13, 11, 14, 11, 12]);
        assert!((0..5).all(|roll| resend_sequence(10, 11, roll) == 11));
    }

    #[test]
    fn oldest_survives_window_drop() {
        use crate::loss::{LossSimulator, WindowDrop};

        // the cycle through newer sequences may line up with the loss window; the
        // oldest must still get through within two windows whatever the alignment
        for window in 2..9u32 {
            for skew in 0..window {
                for latest in 1..=12 {
                    let mut loss = WindowDrop::new(window);
                    for _ in 0..skew {
                        loss.should_drop();
                    }
                    let delivered = (0..2 * window)
                        .any(|roll| !loss.should_drop() && resend_sequence(0, latest, roll) == 1);
                    assert!(delivered, "window {window}, skew {skew}, unacked {latest}");
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_odd_capacity() {
        let _ = SequenceRing::<Vec<u8>>::new(48);
    }
}
