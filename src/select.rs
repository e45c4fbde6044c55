use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::str::FromStr;

use ordered_float::OrderedFloat;

use crate::model::Neighbor;

/// A scored candidate. `seq` is the candidate's position in scan order and
/// breaks distance ties, so both strategies agree on equal distances.
#[derive(Debug, Clone)]
struct Candidate {
    dist: OrderedFloat<f64>,
    seq: usize,
    neighbor: Neighbor,
}

impl Candidate {
    fn key(&self) -> (OrderedFloat<f64>, usize) {
        (self.dist, self.seq)
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for Candidate {}

// Max-heap on (distance, seq): the heap top is always the current worst.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// How the K closest candidates are picked. Output is identical for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Score everything, stable sort, truncate. O(N log N) time, O(N) space.
    FullSort,
    /// Keep at most K+1 candidates, evicting the worst. O(N log K) time, O(K) space.
    #[default]
    Bounded,
}

impl Strategy {
    /// Return the `k` nearest candidates, nearest first.
    /// Equal distances keep the order in which the iterator produced them.
    pub fn select<I>(&self, candidates: I, k: usize) -> Vec<Neighbor>
    where
        I: IntoIterator<Item = Neighbor>,
    {
        if k == 0 {
            return Vec::new();
        }
        let scored = candidates.into_iter().enumerate().map(|(seq, neighbor)| Candidate {
            dist: OrderedFloat(neighbor.distance_km),
            seq,
            neighbor,
        });

        match self {
            Strategy::FullSort => {
                let mut all: Vec<Candidate> = scored.collect();
                all.sort();
                all.truncate(k);
                all.into_iter().map(|c| c.neighbor).collect()
            }
            Strategy::Bounded => {
                let mut working: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
                for cand in scored {
                    if working.len() < k {
                        working.push(cand);
                        continue;
                    }
                    // Later seq never beats the worst on an exact tie
                    let beats_worst = working.peek().map_or(true, |worst| cand < *worst);
                    if beats_worst {
                        working.push(cand);
                        working.pop();
                    }
                }
                working.into_sorted_vec().into_iter().map(|c| c.neighbor).collect()
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::FullSort => write!(f, "full-sort"),
            Strategy::Bounded => write!(f, "bounded"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full-sort" | "fullsort" | "sort" => Ok(Strategy::FullSort),
            "bounded" | "top-k" | "topk" => Ok(Strategy::Bounded),
            other => Err(format!("unknown strategy '{}' (expected 'bounded' or 'full-sort')", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn n(id: &str, d: f64) -> Neighbor {
        Neighbor { identity: id.to_string(), distance_km: d, latitude: 0.0, longitude: 0.0 }
    }

    fn ids(v: &[Neighbor]) -> Vec<&str> {
        v.iter().map(|x| x.identity.as_str()).collect()
    }

    #[test]
    fn picks_k_smallest_in_order() {
        let input = vec![n("a", 5.0), n("b", 1.0), n("c", 3.0), n("d", 4.0), n("e", 2.0)];
        for s in [Strategy::FullSort, Strategy::Bounded] {
            let out = s.select(input.clone(), 3);
            assert_eq!(ids(&out), ["b", "e", "c"], "{s}");
        }
    }

    #[test]
    fn k_larger_than_input_returns_everything() {
        let input = vec![n("a", 2.0), n("b", 1.0)];
        for s in [Strategy::FullSort, Strategy::Bounded] {
            assert_eq!(ids(&s.select(input.clone(), 10)), ["b", "a"]);
        }
    }

    #[test]
    fn zero_k_and_empty_input() {
        for s in [Strategy::FullSort, Strategy::Bounded] {
            assert!(s.select(vec![n("a", 1.0)], 0).is_empty());
            assert!(s.select(Vec::new(), 5).is_empty());
        }
    }

    #[test]
    fn ties_keep_scan_order() {
        let input = vec![n("x", 9.0), n("a", 1.0), n("b", 1.0), n("c", 1.0), n("d", 0.5)];
        for s in [Strategy::FullSort, Strategy::Bounded] {
            assert_eq!(ids(&s.select(input.clone(), 3)), ["d", "a", "b"], "{s}");
        }
    }

    #[test]
    fn nan_sorts_last() {
        let input = vec![n("nan", f64::NAN), n("a", 1.0)];
        for s in [Strategy::FullSort, Strategy::Bounded] {
            assert_eq!(ids(&s.select(input.clone(), 1)), ["a"]);
        }
    }

    #[test]
    fn strategies_agree_on_random_data() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for round in 0..200 {
            let len = rng.gen_range(0..300);
            // Coarse distances force plenty of ties
            let input: Vec<Neighbor> = (0..len)
                .map(|i| n(&format!("u{i}"), rng.gen_range(0..50) as f64 * 10.0))
                .collect();
            let k = rng.gen_range(0..40);

            let full = Strategy::FullSort.select(input.clone(), k);
            let bounded = Strategy::Bounded.select(input, k);
            assert_eq!(full, bounded, "round {round}, k {k}");
            assert_eq!(full.len(), k.min(len));
            assert!(full.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
        }
    }

    #[test]
    fn parses_names() {
        assert_eq!("bounded".parse::<Strategy>().unwrap(), Strategy::Bounded);
        assert_eq!("Full-Sort".parse::<Strategy>().unwrap(), Strategy::FullSort);
        assert!("kd-tree".parse::<Strategy>().is_err());
        assert_eq!(Strategy::default().to_string(), "bounded");
    }
}
