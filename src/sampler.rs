use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::error::Result;
use crate::util::check_state;

/// One reservoir occupancy: the handle it pins, the heap weight drawn for
/// it, and the stream position at which it was admitted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleEntry {
    pub point_index: usize,
    pub weight: f32,
    pub sequence_index: u64,
}

/// Outcome of offering one stream entry to the sampler.
#[derive(Debug)]
pub enum Acceptance {
    /// The entry is admitted; `evicted` names the occupancy that must leave
    /// the paired tree first (absent during warmup growth).
    Accept {
        weight: f32,
        evicted: Option<SampleEntry>,
    },
    Reject,
}

/// Time-decayed weighted reservoir over point handles.
///
/// Entries carry the weight `ln(-ln u) - lambda * seq`; the reservoir keeps
/// the `capacity` smallest weights in a max-heap, so a positive decay rate
/// lets recent stream positions crowd out old ones. The accept/insert split
/// lets the tree substitute an equal point's existing handle before the
/// occupancy is recorded.
pub struct StreamSampler {
    capacity: usize,
    time_decay: f64,
    initial_accept_fraction: f64,
    weights: Vec<f32>,
    point_indexes: Vec<usize>,
    sequence_indexes: Vec<u64>,
    size: usize,
    entries_seen: u64,
    random_seed: u64,
}

impl StreamSampler {
    pub fn new(
        capacity: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        random_seed: u64,
    ) -> Self {
        StreamSampler {
            capacity,
            time_decay,
            initial_accept_fraction,
            weights: Vec::with_capacity(capacity),
            point_indexes: Vec::with_capacity(capacity),
            sequence_indexes: Vec::with_capacity(capacity),
            size: 0,
            entries_seen: 0,
            random_seed,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    pub fn entries_seen(&self) -> u64 {
        self.entries_seen
    }

    pub fn time_decay(&self) -> f64 {
        self.time_decay
    }

    pub fn entries(&self) -> impl Iterator<Item = SampleEntry> + '_ {
        (0..self.size).map(move |i| SampleEntry {
            point_index: self.point_indexes[i],
            weight: self.weights[i],
            sequence_index: self.sequence_indexes[i],
        })
    }

    /// Fill level below which the reservoir counts as warming up. Growth
    /// below capacity is unconditional either way; the boundary is part of
    /// the sampler's persisted state.
    pub fn is_in_warmup(&self) -> bool {
        (self.size as f64) < self.initial_accept_fraction * self.capacity as f64
    }

    /// Offers the stream entry at `sequence_index`. Below capacity every
    /// entry is admitted without eviction; at capacity the entry must beat
    /// the current max weight, and the evicted occupancy is handed back so
    /// the caller can delete it from the paired tree before calling
    /// `insert`.
    pub fn accept(&mut self, sequence_index: u64) -> Acceptance {
        let mut rng = ChaCha20Rng::seed_from_u64(self.random_seed);
        self.random_seed = rng.next_u64();
        self.entries_seen += 1;

        let weight = (f64::ln(-f64::ln(rng.gen::<f64>()))
            - sequence_index as f64 * self.time_decay) as f32;

        if !self.is_full() {
            return Acceptance::Accept {
                weight,
                evicted: None,
            };
        }
        if weight < self.weights[0] {
            let evicted = self.evict_max();
            return Acceptance::Accept {
                weight,
                evicted: Some(evicted),
            };
        }
        Acceptance::Reject
    }

    /// Records an accepted occupancy. `point_index` may differ from the
    /// handle originally offered when the tree coalesced a duplicate.
    pub fn insert(&mut self, point_index: usize, weight: f32, sequence_index: u64) {
        debug_assert!(self.size < self.capacity, "sampler full");
        self.weights.push(weight);
        self.point_indexes.push(point_index);
        self.sequence_indexes.push(sequence_index);
        self.size += 1;

        let mut current = self.size - 1;
        while current > 0 {
            let parent = (current - 1) / 2;
            if self.weights[parent] < self.weights[current] {
                self.swap(current, parent);
                current = parent;
            } else {
                break;
            }
        }
    }

    fn evict_max(&mut self) -> SampleEntry {
        let evicted = SampleEntry {
            point_index: self.point_indexes[0],
            weight: self.weights[0],
            sequence_index: self.sequence_indexes[0],
        };
        self.size -= 1;
        self.weights.swap_remove(0);
        self.point_indexes.swap_remove(0);
        self.sequence_indexes.swap_remove(0);
        if self.size > 0 {
            self.sift_down(0);
        }
        evicted
    }

    fn sift_down(&mut self, start: usize) {
        let mut current = start;
        while 2 * current + 1 < self.size {
            let mut largest = 2 * current + 1;
            let right = 2 * current + 2;
            if right < self.size && self.weights[right] > self.weights[largest] {
                largest = right;
            }
            if self.weights[largest] > self.weights[current] {
                self.swap(current, largest);
                current = largest;
            } else {
                break;
            }
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.weights.swap(a, b);
        self.point_indexes.swap(a, b);
        self.sequence_indexes.swap(a, b);
    }

    #[cfg(test)]
    pub(crate) fn is_heap(&self) -> bool {
        (1..self.size).all(|i| self.weights[(i - 1) / 2] >= self.weights[i])
    }

    pub(crate) fn random_seed(&self) -> u64 {
        self.random_seed
    }

    pub(crate) fn restore(
        capacity: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        entries: &[SampleEntry],
        entries_seen: u64,
        random_seed: u64,
    ) -> Result<Self> {
        check_state(entries.len() <= capacity, "more entries than capacity")?;
        let mut sampler = StreamSampler::new(capacity, time_decay, initial_accept_fraction, random_seed);
        for e in entries {
            sampler.insert(e.point_index, e.weight, e.sequence_index);
        }
        sampler.entries_seen = entries_seen;
        Ok(sampler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sampler: &mut StreamSampler, updates: u64) -> usize {
        let mut accepted = 0;
        for seq in 0..updates {
            if let Acceptance::Accept { weight, evicted } = sampler.accept(seq) {
                if let Some(e) = evicted {
                    assert!(e.point_index < updates as usize);
                }
                sampler.insert(seq as usize, weight, seq);
                accepted += 1;
            }
            assert!(sampler.is_heap());
            assert!(sampler.size() <= sampler.capacity());
        }
        accepted
    }

    #[test]
    fn reservoir_never_exceeds_capacity() {
        let mut sampler = StreamSampler::new(32, 0.0, 0.125, 99);
        let accepted = drain(&mut sampler, 2000);
        assert!(accepted >= sampler.capacity());
        assert_eq!(sampler.size(), 32);
        assert_eq!(sampler.entries_seen(), 2000);
    }

    #[test]
    fn small_streams_are_kept_whole() {
        // below capacity nothing is rejected or evicted
        let mut sampler = StreamSampler::new(100, 0.0, 0.125, 7);
        let accepted = drain(&mut sampler, 50);
        assert_eq!(accepted, 50);
        assert_eq!(sampler.size(), 50);
        assert!(!sampler.is_in_warmup());
    }

    #[test]
    fn positive_decay_retains_recent_entries() {
        let capacity = 64;
        let mut sampler = StreamSampler::new(capacity, 0.05, 0.125, 11);
        drain(&mut sampler, 10_000);
        let mean_seq: f64 = sampler
            .entries()
            .map(|e| e.sequence_index as f64)
            .sum::<f64>()
            / capacity as f64;
        // an undecayed reservoir would center near 5000
        assert!(mean_seq > 8000.0, "mean sequence {}", mean_seq);
    }

    #[test]
    fn zero_decay_samples_broadly() {
        let capacity = 64;
        let mut sampler = StreamSampler::new(capacity, 0.0, 0.125, 11);
        drain(&mut sampler, 10_000);
        let mean_seq: f64 = sampler
            .entries()
            .map(|e| e.sequence_index as f64)
            .sum::<f64>()
            / capacity as f64;
        assert!(mean_seq > 2000.0 && mean_seq < 8000.0, "mean sequence {}", mean_seq);
    }

    #[test]
    fn fixed_seed_is_deterministic() {
        let run = || {
            let mut sampler = StreamSampler::new(16, 0.01, 0.125, 5);
            drain(&mut sampler, 500);
            sampler.entries().collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
