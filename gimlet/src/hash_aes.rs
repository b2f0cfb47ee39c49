// -*- mode: rust; -*-
//
// This file is part of `gimlet`.
// See LICENSE for licensing information.

//! Implementations of correlation-robust hash functions (and their variants)
//! based on AES.

use crate::{Aes128, Block};

/// AES-based correlation-robust hash function.
///
/// This hash function supports the correlation-robust variants given in
/// <https://eprint.iacr.org/2019/074>.
pub struct AesHash {
    aes: Aes128,
}

impl AesHash {
    /// Initialize the hash function using `key`.
    #[inline]
    pub fn new(key: Block) -> Self {
        let aes = Aes128::new(key);
        AesHash { aes }
    }

    /// Correlation-robust hash function for 128-bit inputs (cf.
    /// <https://eprint.iacr.org/2019/074>, §7.2).
    ///
    /// The function computes `π(x) ⊕ x`.
    #[inline]
    pub fn cr_hash(&self, x: Block) -> Block {
        self.aes.encrypt(x) ^ x
    }

    /// Batch variant of `cr_hash`: hashes `xs` into `out`.
    pub fn cr_hash_blocks(&self, xs: &[Block], out: &mut [Block]) {
        out.copy_from_slice(xs);
        self.aes.encrypt_blocks(out);
        for (o, x) in out.iter_mut().zip(xs.iter()) {
            *o ^= *x;
        }
    }

    /// Tweakable circular correlation robust hash function (cf.
    /// <https://eprint.iacr.org/2019/074>, §7.4).
    ///
    /// The function computes `π(π(x) ⊕ i) ⊕ π(x)`.
    #[inline]
    pub fn tccr_hash(&self, i: Block, x: Block) -> Block {
        let y = self.aes.encrypt(x);
        let t = y ^ i;
        let z = self.aes.encrypt(t);
        y ^ z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cr_hash_blocks_matches_scalar() {
        let hash = AesHash::new(rand::random::<Block>());
        let xs: Vec<Block> = (0..100).map(|_| rand::random()).collect();
        let mut out = vec![Block::ZERO; xs.len()];
        hash.cr_hash_blocks(&xs, &mut out);
        for (x, o) in xs.iter().zip(out.iter()) {
            assert_eq!(*o, hash.cr_hash(*x));
        }
    }
}
