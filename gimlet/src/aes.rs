// -*- mode: rust; -*-
//
// This file is part of `gimlet`.
// See LICENSE for licensing information.

//! AES-128, encryption only, on top of the `aes` block cipher.

use crate::Block;
use aes::cipher::{
    generic_array::{typenum::U16, GenericArray},
    BlockEncrypt, KeyInit,
};
use aes::Aes128 as AesAes128;

/// AES-128, encryption only.
#[derive(Clone)]
pub struct Aes128(AesAes128);

impl Aes128 {
    /// Create a new `Aes128` object, using `key` as the AES key.
    #[inline]
    pub fn new(key: Block) -> Self {
        Aes128(AesAes128::new(GenericArray::from_slice(key.as_ref())))
    }

    /// Encrypt a block, outputting the ciphertext.
    #[inline]
    pub fn encrypt(&self, m: Block) -> Block {
        let mut bytes: [u8; 16] = m.into();
        self.0
            .encrypt_block(GenericArray::from_mut_slice(&mut bytes));
        Block::from(bytes)
    }

    /// Encrypt a slice of blocks in place, feeding the backend eight blocks
    /// at a time so it can use its parallel code path.
    pub fn encrypt_blocks(&self, blocks: &mut [Block]) {
        let mut buf = [GenericArray::<u8, U16>::default(); 8];
        for chunk in blocks.chunks_mut(8) {
            for (b, g) in chunk.iter().zip(buf.iter_mut()) {
                g.copy_from_slice(b.as_ref());
            }
            self.0.encrypt_blocks(&mut buf[..chunk.len()]);
            for (b, g) in chunk.iter_mut().zip(buf.iter()) {
                b.as_mut().copy_from_slice(g);
            }
        }
    }
}

impl std::fmt::Debug for Aes128 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Aes128 {{ .. }}")
    }
}
