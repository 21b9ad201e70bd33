//! Numeric boundary generation.
//!
//! Parsers tend to break around the limits of the integer types they use, so most numeric
//! mutations concentrate around a fixed table of boundaries. [`EdgeCaseGenerator`] builds, for a
//! `[min; max]` domain, the list of boundaries falling in the domain, and spans `N` values on
//! each side of every boundary. [`IntegerEdgeCases`] wraps it and falls back to a plain
//! enumeration for small domains.
//!
//! Values are handled as `i128` so that both the `i64` and the `u64` domains fit.

use std::collections::HashSet;

use crate::utils::Random;

/// Boundaries of the integer types, in ascending order.
pub const EDGES: &[i128] = &[
    i64::MIN as i128,
    i32::MIN as i128,
    i16::MIN as i128,
    i8::MIN as i128,
    0,
    i8::MAX as i128,
    i8::MAX as i128 + 1,
    u8::MAX as i128,
    u8::MAX as i128 + 1,
    i16::MAX as i128,
    i16::MAX as i128 + 1,
    u16::MAX as i128,
    u16::MAX as i128 + 1,
    i32::MAX as i128,
    i32::MAX as i128 + 1,
    u32::MAX as i128,
    u32::MAX as i128 + 1,
    i64::MAX as i128,
    i64::MAX as i128 + 1,
    u64::MAX as i128,
];

/// Generates values around the integer boundaries of a domain.
#[derive(Clone, Debug)]
pub struct EdgeCaseGenerator {
    min: i128,
    max: i128,
    /// Span on each side of a boundary.
    n: i128,
    /// Boundaries falling in `[min; max]`, domain limits included.
    edges: Vec<i128>,
    /// Every value the generator can emit sequentially, boundaries first.
    values: Vec<i128>,
}

impl EdgeCaseGenerator {
    /// Creates a generator for the domain `[min; max]` with a span of `n` values around each
    /// boundary.
    pub fn new(min: i128, max: i128, n: usize) -> Self {
        assert!(min <= max, "invalid domain [{}; {}]", min, max);
        let n = n as i128;
        let mut edges = EDGES
            .iter()
            .copied()
            .filter(|e| (min..=max).contains(e))
            .chain([min, max])
            .collect::<Vec<_>>();
        edges.sort_unstable();
        edges.dedup();

        // Exact boundaries come first, then their neighbours ordered by distance.
        let mut seen = HashSet::new();
        let mut values = vec![];
        for dist in 0..=n {
            for e in edges.iter() {
                for v in [e - dist, e + dist] {
                    if (min..=max).contains(&v) && seen.insert(v) {
                        values.push(v);
                    }
                }
            }
        }
        Self {
            min,
            max,
            n,
            edges,
            values,
        }
    }

    pub fn edges(&self) -> &[i128] {
        &self.edges
    }

    pub fn values(&self) -> &[i128] {
        &self.values
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    /// Returns the `idx`-th value of the table.
    pub fn sequential(&self, idx: usize) -> Option<i128> {
        self.values.get(idx).copied()
    }

    /// Picks a boundary uniformly, then an offset following a gaussian curve centered on it.
    /// Domain limits only use the half of the curve pointing inside the domain.
    pub fn random(&self, rand: &mut Random) -> i128 {
        let stddev = (self.n as f64 / 3.0).max(f64::MIN_POSITIVE);
        loop {
            let edge = *rand.choose(&self.edges).unwrap_or(&self.min);
            let mut offset = rand.next_gaussian(0.0, stddev).round() as i128;
            if edge == self.min {
                offset = offset.abs();
            } else if edge == self.max {
                offset = -offset.abs();
            }
            let v = edge.saturating_add(offset);
            if (self.min..=self.max).contains(&v) {
                return v;
            }
        }
    }
}

/// Integer edge cases over a domain. Domains holding at most 256 values are enumerated
/// entirely.
#[derive(Clone, Debug)]
pub enum IntegerEdgeCases {
    Full { min: i128, max: i128 },
    Edges(EdgeCaseGenerator),
}

impl IntegerEdgeCases {
    pub fn new(min: i128, max: i128, n: usize) -> Self {
        if max - min <= 0xff {
            IntegerEdgeCases::Full { min, max }
        } else {
            IntegerEdgeCases::Edges(EdgeCaseGenerator::new(min, max, n))
        }
    }

    pub fn count(&self) -> usize {
        match self {
            IntegerEdgeCases::Full { min, max } => (max - min + 1) as usize,
            IntegerEdgeCases::Edges(g) => g.count(),
        }
    }

    pub fn sequential(&self, idx: usize) -> Option<i128> {
        match self {
            IntegerEdgeCases::Full { min, max } => {
                let v = min + idx as i128;
                (v <= *max).then_some(v)
            }
            IntegerEdgeCases::Edges(g) => g.sequential(idx),
        }
    }

    pub fn random(&self, rand: &mut Random) -> i128 {
        match self {
            IntegerEdgeCases::Full { min, max } => rand.i128_inclusive(*min, *max),
            IntegerEdgeCases::Edges(g) => g.random(rand),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edgecases_byte_domain() {
        let g = EdgeCaseGenerator::new(0, 255, 50);
        assert_eq!(g.edges(), &[0, 127, 128, 255]);
        // [0; 50], [77; 178] and [205; 255].
        assert_eq!(g.count(), 51 + 102 + 51);
        assert_eq!(&g.values()[..4], &[0, 127, 128, 255]);
    }

    #[test]
    fn edgecases_wide_domains() {
        let g = EdgeCaseGenerator::new(i64::MIN as i128, i64::MAX as i128, 50);
        assert!(g.values().contains(&(i64::MIN as i128)));
        assert!(g.values().contains(&(i64::MIN as i128 + 50)));
        assert!(!g.values().contains(&(i64::MIN as i128 + 51)));
        assert!(g.values().contains(&(i32::MAX as i128 + 1)));
        assert!(g.values().contains(&(u32::MAX as i128 - 50)));
        assert!(!g.values().contains(&(u64::MAX as i128)));
        let unique = g.values().iter().collect::<HashSet<_>>();
        assert_eq!(unique.len(), g.count());

        let g = EdgeCaseGenerator::new(0, u64::MAX as i128, 10);
        assert!(g.values().contains(&(u64::MAX as i128)));
        assert!(g.values().iter().all(|v| *v >= 0 && *v <= u64::MAX as i128));
    }

    #[test]
    fn edgecases_random_stays_close() {
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let g = EdgeCaseGenerator::new(-1000, 100000, 50);
        for _ in 0..2000 {
            let v = g.random(&mut rand);
            assert!((-1000..=100000).contains(&v));
            assert!(g.edges().iter().any(|e| (v - e).abs() <= 200));
        }
    }

    #[test]
    fn edgecases_small_domains() {
        let e = IntegerEdgeCases::new(0, 92, 50);
        assert_eq!(e.count(), 93);
        assert_eq!(e.sequential(0), Some(0));
        assert_eq!(e.sequential(92), Some(92));
        assert_eq!(e.sequential(93), None);
        let e = IntegerEdgeCases::new(0, 1000, 50);
        assert!(matches!(e, IntegerEdgeCases::Edges(_)));
        // [0; 50], [77; 178], [205; 306] and [950; 1000].
        assert_eq!(e.count(), 51 + 102 + 102 + 51);
    }
}
