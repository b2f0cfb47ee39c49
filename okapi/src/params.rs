//! Size derivation for the per-bin solver: sparse expansion, dense tail, and
//! the balls-in-bins capacity bound.

use crate::Error;

/// Arithmetic used for the dense tail of the linear system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenseField {
    /// The dense tail is a packed bit row; the system is solved over GF(2).
    Binary,
    /// The dense tail row is the powers of a GF(2^128) element.
    Gf128,
}

/// Sizing parameters for one solver instance, derived once from
/// `(n, weight, ssp, field)` and immutable afterwards.
#[derive(Clone, Copy, Debug)]
pub struct PaxosParam {
    /// Expected number of items.
    pub n: usize,
    /// Number of sparse columns set per item.
    pub weight: usize,
    /// Statistical security parameter, in bits.
    pub ssp: usize,
    /// Dense-tail arithmetic.
    pub dense_field: DenseField,
    /// Number of sparse columns.
    pub sparse_size: usize,
    /// Number of dense columns.
    pub dense_size: usize,
}

impl PaxosParam {
    /// Compute the solver sizes for `n` items of row weight `weight` with
    /// statistical security `ssp`. Deterministic and pure.
    pub fn new(n: usize, weight: usize, ssp: usize, dense_field: DenseField) -> Result<Self, Error> {
        if !(2..=16).contains(&weight) {
            return Err(Error::MalformedInput(format!(
                "row weight {} outside the supported range 2..=16",
                weight
            )));
        }
        // Expansion factors keep the residual after peeling far below the
        // dense-tail capacity; small inputs get extra slack.
        let mut expansion: f64 = match weight {
            2 | 3 => 2.40,
            _ => 1.30,
        };
        if n < 512 {
            expansion += 1.0;
        } else if n < 8192 {
            expansion += 0.30;
        }
        let sparse_size = std::cmp::max(weight + 1, (expansion * n as f64).ceil() as usize);

        let lg = (sparse_size as f64).log2();
        let gap = if weight == 2 {
            lg.ceil() as usize + 4
        } else {
            (ssp as f64 / ((weight - 2) as f64 * lg)).ceil() as usize + 2
        };
        let dense_size = match dense_field {
            DenseField::Gf128 => gap + 5,
            DenseField::Binary => std::cmp::min(128, gap + ssp),
        };
        if dense_field == DenseField::Binary && gap + ssp > 128 {
            return Err(Error::MalformedInput(format!(
                "binary dense tail of {} bits does not fit in one block",
                gap + ssp
            )));
        }

        let total = sparse_size + dense_size;
        if total > u32::MAX as usize {
            return Err(Error::MalformedInput(format!(
                "solver size {} does not fit 32-bit column indices",
                total
            )));
        }

        Ok(PaxosParam {
            n,
            weight,
            ssp,
            dense_field,
            sparse_size,
            dense_size,
        })
    }

    /// Total output length (sparse plus dense columns), in values.
    #[inline]
    pub fn size(&self) -> usize {
        self.sparse_size + self.dense_size
    }
}

/// An upper bound on the most-loaded of `num_bins` bins after throwing
/// `num_balls` balls, holding except with probability `2^-ssp`.
///
/// Uses the Chernoff tail `P(X >= k) <= e^(k - mu) * (mu / k)^k` for a
/// binomial with mean `mu = num_balls / num_bins`, union-bounded over bins,
/// and binary-searches the smallest admissible `k`.
pub fn bin_size_bound(num_bins: usize, num_balls: usize, ssp: usize) -> usize {
    if num_bins <= 1 || num_balls <= 1 {
        return num_balls;
    }
    let mu = num_balls as f64 / num_bins as f64;
    let target = -(ssp as f64) - (num_bins as f64).log2();
    let log2_tail = |k: usize| -> f64 {
        let k = k as f64;
        (k - mu + k * (mu / k).ln()) / std::f64::consts::LN_2
    };

    let mut lo = mu.ceil() as usize + 1;
    let mut hi = num_balls;
    if log2_tail(hi) > target {
        return num_balls;
    }
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if log2_tail(mid) <= target {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    std::cmp::min(lo, num_balls)
}
