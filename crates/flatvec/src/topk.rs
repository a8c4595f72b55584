//! Bounded top-k selection for streaming scans.
//!
//! A fixed-capacity min-heap keyed by similarity: the scan offers every
//! (score, id) pair it sees and the selector keeps the k best. `offer` is
//! O(log k); `drain` sorts once at the end.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Total-ordered f32 wrapper so scores can live in a heap.
#[derive(Clone, Copy, PartialEq)]
struct Score(f32);

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

/// Heap entry ordered by score, ties broken by id (lower id ranks higher).
///
/// The tie break makes the retained set a pure function of the offered
/// multiset: equal-scored candidates never depend on arrival order.
#[derive(Clone, Copy, PartialEq, Eq)]
struct Entry {
    score: Score,
    id: u32,
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Online selector for the k largest-similarity (score, id) pairs.
pub struct TopK {
    capacity: usize,
    // Reverse turns the max-heap into a min-heap: the root is the weakest
    // retained entry, which is the one a better candidate evicts.
    heap: BinaryHeap<std::cmp::Reverse<Entry>>,
}

impl TopK {
    /// Create a selector that retains at most `capacity` entries.
    ///
    /// `capacity` must be at least 1; the engine validates k before the
    /// scan starts.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity >= 1);
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity + 1),
        }
    }

    /// Offer a candidate: inserted while under capacity, otherwise it
    /// replaces the current weakest entry iff it ranks strictly higher.
    pub fn offer(&mut self, score: f32, id: u32) {
        let entry = Entry {
            score: Score(score),
            id,
        };
        if self.heap.len() < self.capacity {
            self.heap.push(std::cmp::Reverse(entry));
        } else if let Some(&std::cmp::Reverse(weakest)) = self.heap.peek() {
            if entry > weakest {
                self.heap.pop();
                self.heap.push(std::cmp::Reverse(entry));
            }
        }
    }

    /// Weakest retained score, if any. A scan can skip the heap entirely
    /// for candidates that cannot beat it once the selector is full.
    #[must_use]
    pub fn min_score(&self) -> Option<f32> {
        self.heap.peek().map(|std::cmp::Reverse(e)| e.score.0)
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when nothing has been retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Consume the selector, returning (id, score) pairs sorted by
    /// descending score; equal scores order by ascending id.
    #[must_use]
    pub fn drain(self) -> Vec<(u32, f32)> {
        let mut entries: Vec<Entry> = self
            .heap
            .into_iter()
            .map(|std::cmp::Reverse(e)| e)
            .collect();
        entries.sort_unstable_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| (e.id, e.score.0)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_capacity_keeps_everything() {
        let mut topk = TopK::new(10);
        topk.offer(0.5, 1);
        topk.offer(0.9, 2);
        topk.offer(0.1, 3);

        let out = topk.drain();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], (2, 0.9));
        assert_eq!(out[1], (1, 0.5));
        assert_eq!(out[2], (3, 0.1));
    }

    #[test]
    fn test_eviction_keeps_largest() {
        let mut topk = TopK::new(2);
        topk.offer(0.3, 1);
        topk.offer(0.7, 2);
        topk.offer(0.5, 3);
        topk.offer(0.1, 4);

        let out = topk.drain();
        assert_eq!(out, vec![(2, 0.7), (3, 0.5)]);
    }

    #[test]
    fn test_weaker_candidate_discarded() {
        let mut topk = TopK::new(1);
        topk.offer(0.9, 7);
        topk.offer(0.2, 8);
        assert_eq!(topk.drain(), vec![(7, 0.9)]);
    }

    #[test]
    fn test_min_score_tracks_weakest() {
        let mut topk = TopK::new(2);
        assert_eq!(topk.min_score(), None);
        topk.offer(0.4, 1);
        topk.offer(0.8, 2);
        assert_eq!(topk.min_score(), Some(0.4));
        topk.offer(0.6, 3);
        assert_eq!(topk.min_score(), Some(0.6));
    }

    #[test]
    fn test_negative_scores() {
        let mut topk = TopK::new(2);
        topk.offer(-0.9, 1);
        topk.offer(-0.1, 2);
        topk.offer(-0.5, 3);
        assert_eq!(topk.drain(), vec![(2, -0.1), (3, -0.5)]);
    }

    #[test]
    fn test_tie_break_is_order_independent() {
        // Same multiset offered in two orders must retain the same set.
        let offers = [(0.5_f32, 10_u32), (0.5, 11), (0.5, 12)];

        let mut forward = TopK::new(2);
        for (s, i) in offers {
            forward.offer(s, i);
        }
        let mut backward = TopK::new(2);
        for (s, i) in offers.iter().rev() {
            backward.offer(*s, *i);
        }

        assert_eq!(forward.drain(), backward.drain());
    }

    #[test]
    fn test_drain_is_descending() {
        let mut topk = TopK::new(5);
        for (i, s) in [0.3, 0.9, 0.1, 0.7, 0.5].iter().enumerate() {
            topk.offer(*s, i as u32);
        }
        let out = topk.drain();
        for pair in out.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }
}
