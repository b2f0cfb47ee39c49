// -*- mode: rust; -*-
//
// This file is part of `gimlet`.
// See LICENSE for licensing information.

//! AES-based random number generator.

use crate::{Aes128, Block};
use rand::{CryptoRng, Error, Rng, RngCore, SeedableRng};
use rand_core::block::{BlockRng64, BlockRngCore};

/// Implementation of a random number generator based on AES in counter mode.
#[derive(Clone)]
pub struct AesRng(BlockRng64<AesRngCore>);

impl RngCore for AesRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }
    #[inline]
    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }
    #[inline]
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }
    #[inline]
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.0.try_fill_bytes(dest)
    }
}

impl SeedableRng for AesRng {
    type Seed = <AesRngCore as SeedableRng>::Seed;

    #[inline]
    fn from_seed(seed: Self::Seed) -> Self {
        AesRng(BlockRng64::<AesRngCore>::from_seed(seed))
    }
    #[inline]
    fn from_rng<R: RngCore>(rng: R) -> Result<Self, Error> {
        BlockRng64::<AesRngCore>::from_rng(rng).map(AesRng)
    }
}

impl CryptoRng for AesRng {}

impl AesRng {
    /// Create a new random number generator using a random seed from
    /// `rand::random`.
    #[inline]
    pub fn new() -> Self {
        let seed = rand::random::<Block>();
        AesRng::from_seed(seed)
    }

    /// Create a new RNG using a random seed from this one.
    #[inline]
    pub fn fork(&mut self) -> Self {
        let seed = self.gen::<Block>();
        AesRng::from_seed(seed)
    }

    /// Fill a block slice with random values.
    #[inline]
    pub fn fill_blocks(&mut self, blocks: &mut [Block]) {
        self.fill_bytes(bytemuck::cast_slice_mut(blocks));
    }
}

impl Default for AesRng {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AesRng {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "AesRng {{ .. }}")
    }
}

/// The core of `AesRng`, used with `BlockRng64`.
#[derive(Clone)]
pub struct AesRngCore {
    aes: Aes128,
    counter: u64,
}

impl BlockRngCore for AesRngCore {
    type Item = u64;
    type Results = [u64; 8];

    // Compute `E(ctr)` four blocks at a time.
    #[inline]
    fn generate(&mut self, results: &mut Self::Results) {
        let mut blocks = [Block::ZERO; 4];
        for b in blocks.iter_mut() {
            *b = Block::from(self.counter as u128);
            self.counter += 1;
        }
        self.aes.encrypt_blocks(&mut blocks);
        *results = bytemuck::cast(blocks);
    }
}

impl SeedableRng for AesRngCore {
    type Seed = Block;

    #[inline]
    fn from_seed(seed: Self::Seed) -> Self {
        AesRngCore {
            aes: Aes128::new(seed),
            counter: 0,
        }
    }
}

impl CryptoRng for AesRngCore {}

impl std::fmt::Debug for AesRngCore {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "AesRngCore {{ .. }}")
    }
}
