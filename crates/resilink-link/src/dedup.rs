/// Tracks recently received message IDs so retransmissions can be dropped.
///
/// One bit per possible ID. Marking an ID clears the byte 128 positions
/// ahead in the cycle, so by the time the sender's allocator wraps around,
/// the old mark is gone and the reused ID registers as new.
#[derive(Debug)]
pub(crate) struct SeenWindow {
    bits: [u8; 32],
}

impl SeenWindow {
    pub(crate) fn new() -> Self {
        Self { bits: [0; 32] }
    }

    pub(crate) fn contains(&self, mid: u8) -> bool {
        self.bits[(mid >> 3) as usize] & (1 << (mid & 7)) != 0
    }

    /// Mark an ID as seen. Returns `false` if it was already marked.
    pub(crate) fn insert(&mut self, mid: u8) -> bool {
        let idx = (mid >> 3) as usize;
        let bit = 1u8 << (mid & 7);
        let fresh = self.bits[idx] & bit == 0;
        self.bits[idx] |= bit;
        self.bits[(idx + 16) & 0x1f] = 0;
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_id_inserts_once() {
        let mut seen = SeenWindow::new();
        assert!(!seen.contains(7));
        assert!(seen.insert(7));
        assert!(seen.contains(7));
        assert!(!seen.insert(7));
    }

    #[test]
    fn ids_are_independent() {
        let mut seen = SeenWindow::new();
        assert!(seen.insert(1));
        assert!(seen.insert(2));
        assert!(seen.insert(255));
        assert!(!seen.insert(1));
    }

    #[test]
    fn wrapped_id_ages_out() {
        let mut seen = SeenWindow::new();
        assert!(seen.insert(1));
        assert!(!seen.insert(1));
        // Half a cycle later the allocator reaches the opposite side of
        // the ID space, which erases the stale mark.
        assert!(seen.insert(128));
        assert!(seen.insert(1));
    }
}
