//! HyperLogLog register array and estimator.

use crate::error::SketchError;
use crate::hash::hash_user_id;

/// Smallest supported precision (16 registers).
pub const MIN_PRECISION: u8 = 4;

/// Largest supported precision (262 144 registers).
pub const MAX_PRECISION: u8 = 18;

/// Precision used for every unique-user state in Pulse.
pub const DEFAULT_PRECISION: u8 = 14;

/// `1 / (2 ln 2)`, the asymptotic bias constant of the raw estimator.
const ALPHA_INF: f64 = 0.721_347_520_444_481_7;

/// Approximate distinct-count sketch.
///
/// Each register holds the highest observed rank (position of the first set
/// bit after the index bits) for the hashes routed to it. Merging takes the
/// register-wise maximum, which is associative, commutative and idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperLogLog {
    pub(crate) precision: u8,
    pub(crate) registers: Vec<u8>,
}

impl HyperLogLog {
    /// Creates an empty sketch at [`DEFAULT_PRECISION`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            registers: vec![0; 1 << DEFAULT_PRECISION],
        }
    }

    /// Creates an empty sketch with `2^precision` registers.
    ///
    /// # Errors
    ///
    /// Returns `SketchError::InvalidPrecision` outside
    /// `MIN_PRECISION..=MAX_PRECISION`.
    pub fn with_precision(precision: u8) -> Result<Self, SketchError> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(SketchError::InvalidPrecision(precision));
        }
        Ok(Self {
            precision,
            registers: vec![0; 1 << precision],
        })
    }

    /// Returns the sketch precision.
    #[must_use]
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Returns the number of registers.
    #[must_use]
    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    /// Highest rank a register can hold at this precision.
    pub(crate) fn max_rank(&self) -> u8 {
        64 - self.precision + 1
    }

    /// Returns `true` if nothing has been inserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registers.iter().all(|&r| r == 0)
    }

    /// Records a user identifier.
    pub fn insert(&mut self, user_id: u32) {
        self.insert_hash(hash_user_id(user_id));
    }

    /// Records a pre-computed 64-bit hash.
    #[allow(clippy::cast_possible_truncation)]
    pub fn insert_hash(&mut self, hash: u64) {
        let p = u32::from(self.precision);
        let index = (hash >> (64 - p)) as usize;
        let tail_bits = 64 - p;
        let rank = ((hash << p).leading_zeros().min(tail_bits) + 1) as u8;
        let register = &mut self.registers[index];
        if rank > *register {
            *register = rank;
        }
    }

    /// Folds `other` into `self`.
    ///
    /// # Errors
    ///
    /// Returns `SketchError::PrecisionMismatch` if the sketches differ in
    /// register count; `self` is left untouched in that case.
    pub fn merge(&mut self, other: &Self) -> Result<(), SketchError> {
        if self.precision != other.precision {
            return Err(SketchError::PrecisionMismatch {
                left: self.precision,
                right: other.precision,
            });
        }
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
        Ok(())
    }

    /// Estimated number of distinct inserted values, rounded.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn estimate(&self) -> u64 {
        self.estimate_f64().round() as u64
    }

    /// Estimated number of distinct inserted values (Ertl, 2017).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate_f64(&self) -> f64 {
        let m = self.registers.len() as f64;
        let q = usize::from(64 - self.precision);

        let mut histogram = vec![0_u32; q + 2];
        for &rank in &self.registers {
            histogram[usize::from(rank)] += 1;
        }
        if histogram[0] as usize == self.registers.len() {
            return 0.0;
        }

        let mut z = m * tau(1.0 - f64::from(histogram[q + 1]) / m);
        for k in (1..=q).rev() {
            z = 0.5 * (z + f64::from(histogram[k]));
        }
        z += m * sigma(f64::from(histogram[0]) / m);

        ALPHA_INF * m * m / z
    }
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::float_cmp)]
fn sigma(mut x: f64) -> f64 {
    if x >= 1.0 {
        return f64::INFINITY;
    }
    let mut y = 1.0;
    let mut z = x;
    loop {
        x *= x;
        let previous = z;
        z += x * y;
        y += y;
        if z == previous {
            return z;
        }
    }
}

#[allow(clippy::float_cmp)]
fn tau(mut x: f64) -> f64 {
    if x <= 0.0 || x >= 1.0 {
        return 0.0;
    }
    let mut y = 1.0;
    let mut z = 1.0 - x;
    loop {
        x = x.sqrt();
        let previous = z;
        y *= 0.5;
        z -= (1.0 - x).powi(2) * y;
        if z == previous {
            return z / 3.0;
        }
    }
}
