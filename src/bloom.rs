use bit_vec::BitVec;
use seahash::hash;

/// Probabilistic set of document ids. Answers "definitely absent" without
/// touching the segment.
pub struct BloomFilter {
    bits: BitVec,
    num_hashes: u32,
    expected_items: usize,
    false_positive_rate: f64,
}

impl BloomFilter {
    /// expected_items: how many ids the filter is sized for.
    /// false_positive_rate: acceptable error rate (e.g. 0.01 for 1%).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.5);

        // m = -(n * ln(p)) / (ln(2)^2)
        let ln2 = 2.0f64.ln();
        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(64.0);

        // k = (m / n) * ln(2)
        let k = ((m / n) * ln2).ceil().max(1.0);

        Self {
            bits: BitVec::from_elem(m as usize, false),
            num_hashes: k as u32,
            expected_items,
            false_positive_rate,
        }
    }

    pub fn insert(&mut self, id: &str) {
        for idx in self.positions(id) {
            self.bits.set(idx, true);
        }
    }

    /// FALSE means the id was never inserted. TRUE means it might have been.
    pub fn may_contain(&self, id: &str) -> bool {
        self.positions(id).all(|idx| self.bits.get(idx).unwrap_or(false))
    }

    /// Fresh filter with the same sizing.
    pub fn cleared(&self) -> Self {
        Self::new(self.expected_items, self.false_positive_rate)
    }

    // Double hashing: g_i(x) = h1(x) + i * h2(x)
    fn positions(&self, id: &str) -> impl Iterator<Item = usize> {
        let h1 = hash(id.as_bytes());
        let h2 = h1.wrapping_add(0x9E37_79B9_7F4A_7C15) | 1;
        let m = self.bits.len() as u64;

        (0..self.num_hashes).map(move |i| (h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % m) as usize)
    }
}
