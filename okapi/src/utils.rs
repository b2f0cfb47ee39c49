// -*- mode: rust; -*-
//
// This file is part of `okapi`.
// See LICENSE for licensing information.

use gimlet::{AesHash, Block};
use rand::{CryptoRng, Rng};
use sha2::{Digest, Sha256};

/// Compress arbitrary-length byte items into 128-bit blocks: short items
/// map directly, long items go through SHA-256 first, and everything is
/// keyed through an AES-based correlation-robust hash.
pub fn compress_and_hash_inputs(inputs: &[Vec<u8>], key: Block) -> Vec<Block> {
    let mut hasher = Sha256::new();
    let aes = AesHash::new(key);
    inputs
        .iter()
        .map(|input| {
            let mut digest = [0u8; 16];
            if input.len() <= 16 {
                digest[0..input.len()].copy_from_slice(input);
            } else {
                hasher.update(input);
                let h = hasher.finalize_reset();
                digest.copy_from_slice(&h[0..16]);
            }
            aes.cr_hash(Block::from(digest))
        })
        .collect::<Vec<Block>>()
}

#[allow(dead_code)] // used in tests
pub fn rand_vec<RNG: CryptoRng + Rng>(n: usize, rng: &mut RNG) -> Vec<u8> {
    (0..n).map(|_| rng.gen()).collect()
}

#[allow(dead_code)] // used in tests
pub fn rand_vec_vec<RNG: CryptoRng + Rng>(n: usize, m: usize, rng: &mut RNG) -> Vec<Vec<u8>> {
    (0..n).map(|_| rand_vec(m, rng)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gimlet::AesRng;

    #[test]
    fn test_compress_and_hash_inputs() {
        let mut rng = AesRng::new();
        let key = rng.gen::<Block>();
        let short = rand_vec_vec(13, 8, &mut rng);
        let long = rand_vec_vec(13, 32, &mut rng);
        let a = compress_and_hash_inputs(&short, key);
        let b = compress_and_hash_inputs(&long, key);
        assert_eq!(a.len(), 13);
        assert_eq!(b.len(), 13);
        // Deterministic under the same key.
        assert_eq!(a, compress_and_hash_inputs(&short, key));
    }
}
