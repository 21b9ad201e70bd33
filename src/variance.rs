//! Numeric variations around a current value.
//!
//! [`VarianceGenerator`] produces integers close to an element's current value, with a bias
//! toward small deviations, and never re-emits the value itself unless asked to.
//! [`DoubleVarianceGenerator`] is its floating point counterpart.

use crate::utils::Random;

/// Maximum number of draws before a random generation gives up.
const MAX_ATTEMPTS: usize = 1000;

/// Generates integers around `value` in `[min; max]`.
#[derive(Clone, Debug)]
pub struct VarianceGenerator {
    value: i128,
    min: i128,
    max: i128,
    /// Span on each side of the value.
    n: i128,
    /// Whether the value itself can be emitted.
    use_value: bool,
    /// Values emitted by sequential mutations.
    values: Vec<i128>,
    /// The domain holds at most 256 values and is enumerated entirely.
    full: bool,
}

impl VarianceGenerator {
    pub fn new(value: i128, min: i128, max: i128, n: usize, use_value: bool) -> Self {
        assert!(min <= max, "invalid domain [{}; {}]", min, max);
        let n = n as i128;
        let full = max - min <= 0xff;
        let values = if full {
            (min..=max).filter(|v| use_value || *v != value).collect()
        } else {
            let first = if use_value && (min..=max).contains(&value) {
                vec![value]
            } else {
                vec![]
            };
            first
                .into_iter()
                .chain((1..=n).flat_map(|d| [value - d, value + d]))
                .filter(|v| (min..=max).contains(v))
                .collect()
        };
        Self {
            value,
            min,
            max,
            n,
            use_value,
            values,
            full,
        }
    }

    pub fn values(&self) -> &[i128] {
        &self.values
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn sequential(&self, idx: usize) -> Option<i128> {
        self.values.get(idx).copied()
    }

    /// Draws a value at a distance of `round(|gaussian(0, N/3)|) + 1` from the current one, in a
    /// random direction. Out of range draws are discarded. Returns `None` if no value could be
    /// produced.
    pub fn random(&self, rand: &mut Random) -> Option<i128> {
        if self.values.is_empty() {
            return None;
        }
        if self.full {
            return rand.choose(&self.values).copied();
        }
        let stddev = (self.n as f64 / 3.0).max(f64::MIN_POSITIVE);
        for _ in 0..MAX_ATTEMPTS {
            let mut dist = rand.next_gaussian(0.0, stddev).abs().round() as i128;
            if !self.use_value {
                dist += 1;
            }
            let v = if rand.next_bool() {
                self.value.saturating_add(dist)
            } else {
                self.value.saturating_sub(dist)
            };
            if (self.min..=self.max).contains(&v) && (self.use_value || v != self.value) {
                return Some(v);
            }
        }
        None
    }
}

/// Generates doubles around `value`.
///
/// Draws are uniform over a tight window of `max(|value|, 10)` on each side of the value, and
/// occasionally over a spread window of `max(|value|, 100)`. Both windows are clamped to
/// `[min; max]`. The value itself is never returned.
#[derive(Clone, Debug)]
pub struct DoubleVarianceGenerator {
    value: f64,
    tight: (f64, f64),
    spread: (f64, f64),
}

impl DoubleVarianceGenerator {
    /// Probability of drawing from the spread window.
    const SPREAD_PROBABILITY: f64 = 0.1;

    pub fn new(value: f64, min: f64, max: f64) -> Self {
        let window = |half: f64| {
            let half = value.abs().max(half);
            ((value - half).max(min), (value + half).min(max))
        };
        Self {
            value,
            tight: window(10.0),
            spread: window(100.0),
        }
    }

    pub fn tight(&self) -> (f64, f64) {
        self.tight
    }

    pub fn spread(&self) -> (f64, f64) {
        self.spread
    }

    pub fn random(&self, rand: &mut Random) -> Option<f64> {
        if !self.value.is_finite() {
            return None;
        }
        for _ in 0..MAX_ATTEMPTS {
            let (lo, hi) = if rand.next_double() < Self::SPREAD_PROBABILITY {
                self.spread
            } else {
                self.tight
            };
            let r = rand.next_double();
            let v = lo * (1.0 - r) + hi * r;
            if v.is_finite() && v != self.value {
                return Some(v);
            }
        }
        None
    }
}

// -----------------------------------------------------------------------------------------------
// Tests
