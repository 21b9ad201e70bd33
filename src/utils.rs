//! Random generation primitives shared by every mutator.
//!
//! All statistically shaped mutations draw from [`Random`]. The generator is a plain xorshift
//! PRNG whose state is entirely described by a `u64`, which makes sequential mutations
//! reproducible across runs as long as the caller reseeds it with
//! [`Random::for_iteration`] before each mutation.

// -----------------------------------------------------------------------------------------------
// Random generator

/// Random number generator based on the xorshift algorithm.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Random {
    /// The seed used for random generation.
    seed: u64,
}

impl Random {
    /// Set of alphanumeric characters that can be used when generating random strings.
    const ALPHANUM: &'static str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    /// Standard deviation of the half gaussian used by [`Random::pick_six`].
    const PICK_SIX_SIGMA: f64 = 5.0 / 3.0;

    /// Creates a new random number generator.
    #[inline]
    pub fn new(seed: u64) -> Self {
        assert_ne!(seed, 0);
        Self { seed }
    }

    /// Creates the generator used for a given iteration of a session seeded with `seed`.
    ///
    /// The session seed and the iteration are combined and passed through a splitmix64 round,
    /// so that neighbouring iterations get unrelated streams and the state is never zero.
    #[inline]
    pub fn for_iteration(seed: u64, iteration: u64) -> Self {
        let mut z = seed.wrapping_add(iteration).wrapping_add(0x9e3779b97f4a7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^= z >> 31;
        Self::new(if z == 0 { 0x43e47ca448538d19 } else { z })
    }

    /// Splits the current random number generator into a second one in a deterministic manner.
    #[inline]
    pub fn split(&mut self) -> Self {
        Self::for_iteration(self.u64(), 0x43e47ca448538d19)
    }

    /// Updates the PRNG's internal seed.
    #[inline]
    fn update(&mut self) {
        self.seed ^= self.seed << 13;
        self.seed ^= self.seed >> 7;
        self.seed ^= self.seed << 17;
    }

    /// Retrieves the PRNG's state without updating it.
    #[inline]
    pub fn get_state(&self) -> u64 {
        self.seed
    }

    /// Generates a random `u64` using a uniform distribution.
    #[inline]
    pub fn u64(&mut self) -> u64 {
        self.update();
        self.seed
    }

    /// Generates a random `u64` in the range `[start; end[` using a uniform distribution.
    #[inline]
    pub fn u64_range(&mut self, start: u64, end: u64) -> Option<u64> {
        self.update();
        Some(start + self.seed % end.checked_sub(start).filter(|d| *d != 0)?)
    }

    /// Generates a random `usize` in the range `[start; end[`, or returns `start` if the range is
    /// empty.
    #[inline]
    pub fn usize_range(&mut self, start: usize, end: usize) -> usize {
        self.u64_range(start as u64, end as u64)
            .map(|v| v as usize)
            .unwrap_or(start)
    }

    /// Generates a random `i64` in the range `[min; max[`. Returns `min` when the range is empty.
    #[inline]
    pub fn next(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        let span = (max as i128 - min as i128) as u128;
        (min as i128 + (self.u64() as u128 % span) as i128) as i64
    }

    /// Generates a random `i128` in the inclusive range `[min; max]`.
    ///
    /// The numeric generators work over `i128` so that the whole `i64` and `u64` domains can be
    /// addressed without overflowing.
    #[inline]
    pub fn i128_inclusive(&mut self, min: i128, max: i128) -> i128 {
        if max <= min {
            return min;
        }
        let span = (max - min) as u128 + 1;
        let raw = ((self.u64() as u128) << 64) | self.u64() as u128;
        min + (raw % span) as i128
    }

    /// Generates a random boolean.
    #[inline]
    pub fn next_bool(&mut self) -> bool {
        self.u64() & 1 == 1
    }

    /// Generates a random `f64` in the range `[0; 1[`.
    #[inline]
    pub fn next_double(&mut self) -> f64 {
        (self.u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generates a sample from a normal distribution using the Box-Muller transform.
    pub fn next_gaussian(&mut self, mean: f64, stddev: f64) -> f64 {
        // `1 - x` keeps the logarithm's argument in `]0; 1]`.
        let u1 = 1.0 - self.next_double();
        let u2 = self.next_double();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).sin();
        mean + stddev * z
    }

    /// Returns a number in `[1; 6]` following the positive half of a gaussian curve with a
    /// standard deviation of `5/3`. One and two are by far the most likely outcomes.
    pub fn pick_six(&mut self) -> usize {
        loop {
            let v = self.next_gaussian(0.0, Self::PICK_SIX_SIGMA).abs().round() as usize + 1;
            if v <= 6 {
                return v;
            }
        }
    }

    /// Returns `min(n, k)` distinct values taken from `[1; n]`, in the order they were drawn.
    pub fn permutation(&mut self, n: usize, k: usize) -> Vec<usize> {
        let k = k.min(n);
        let mut sorted: Vec<usize> = Vec::with_capacity(k);
        let mut picks = Vec::with_capacity(k);
        for i in 0..k {
            let mut r = self.next(1, (n + 1 - i) as i64) as usize;
            // Shifts the draw past every value already taken so that the remaining values stay
            // equiprobable.
            for s in sorted.iter() {
                if r >= *s {
                    r += 1;
                } else {
                    break;
                }
            }
            let pos = sorted.partition_point(|s| *s < r);
            sorted.insert(pos, r);
            picks.push(r);
        }
        picks
    }

    /// Same as [`Random::permutation`], but the values are returned in ascending order.
    pub fn sorted_permutation(&mut self, n: usize, k: usize) -> Vec<usize> {
        let mut p = self.permutation(n, k);
        p.sort_unstable();
        p
    }

    /// Shuffles a slice in place using the Fisher-Yates algorithm.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.usize_range(0, i + 1);
            items.swap(i, j);
        }
    }

    /// Picks a random item from a slice.
    #[inline]
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.usize_range(0, items.len()))
    }

    /// Generates a random alphanumeric string of length `len`.
    pub fn str(&mut self, len: usize) -> String {
        (0..len).step_by(8).fold(String::new(), |s, i| {
            let size = std::cmp::min(8, len - i);
            let random = self.u64();
            (0..size).fold(s, |mut t, j| {
                let idx = ((random >> (j * 8)) & 0xff) % Self::ALPHANUM.len() as u64;
                let c = Self::ALPHANUM.as_bytes()[idx as usize] as char;
                t.push(c);
                t
            })
        })
    }

    /// Generates a random vector of bytes of length `len`.
    #[inline]
    pub fn bytes(&mut self, len: usize) -> Vec<u8> {
        let mut v = vec![0u8; len];
        for i in (0..len).step_by(8) {
            let size = std::cmp::min(8, len - i);
            v[i..i + size].copy_from_slice(&self.u64().to_le_bytes()[..size]);
        }
        v
    }
}

// -----------------------------------------------------------------------------------------------
// Weighted list

/// A list of items where each item is picked with a probability proportional to its weight.
#[derive(Clone, Debug)]
pub struct WeightedList<T> {
    /// Items stored alongside the cumulative weight up to and including them.
    items: Vec<(u64, T)>,
    /// Sum of all weights.
    total: u64,
}

impl<T> Default for WeightedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WeightedList<T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            items: vec![],
            total: 0,
        }
    }

    /// Adds an item. Items with a null weight are never picked.
    pub fn add(&mut self, weight: u64, item: T) {
        if weight == 0 {
            return;
        }
        self.total += weight;
        self.items.push((self.total, item));
    }

    /// Number of items that can be picked.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no item can be picked.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of all weights.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Picks an item according to the weights.
    pub fn pick(&self, rand: &mut Random) -> Option<&T> {
        let r = rand.u64_range(0, self.total)?;
        let idx = self.items.partition_point(|(cumul, _)| *cumul <= r);
        self.items.get(idx).map(|(_, item)| item)
    }

    /// Iterates over the items in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|(_, item)| item)
    }
}

// -----------------------------------------------------------------------------------------------
// Tests
