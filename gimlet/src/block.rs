// -*- mode: rust; -*-
//
// This file is part of `gimlet`.
// See LICENSE for licensing information.

//! Defines a block as a 128-bit value, and implements block-related functions.

use bytemuck::{Pod, Zeroable};

/// A 128-bit chunk.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
pub struct Block(pub u128);

impl Block {
    /// The all-zero block.
    pub const ZERO: Block = Block(0);
    /// The all-one block.
    pub const ONES: Block = Block(u128::MAX);

    /// Build a block out of its high and low 64-bit halves.
    #[inline]
    pub fn new(high: u64, low: u64) -> Self {
        Block(((high as u128) << 64) | low as u128)
    }

    /// The low 64 bits.
    #[inline]
    pub fn low_u64(&self) -> u64 {
        self.0 as u64
    }

    /// The high 64 bits.
    #[inline]
    pub fn high_u64(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// Return the least significant bit.
    #[inline]
    pub fn lsb(&self) -> bool {
        self.0 & 1 == 1
    }

    /// Set the least significant bit.
    #[inline]
    pub fn set_lsb(&self) -> Block {
        Block(self.0 | 1)
    }

    /// Flip all bits.
    #[inline]
    pub fn flip(&self) -> Self {
        Block(!self.0)
    }

    /// The first `n` bytes of the little-endian representation, `n ≤ 16`.
    #[inline]
    pub fn prefix(&self, n: usize) -> &[u8] {
        &bytemuck::bytes_of(self)[..n]
    }

    /// Try to create a `Block` from a slice of bytes. The slice must have exactly 16 bytes.
    #[inline]
    pub fn try_from_slice(bytes_slice: &[u8]) -> Option<Self> {
        if bytes_slice.len() != 16 {
            return None;
        }
        let mut bytes = [0; 16];
        bytes.copy_from_slice(bytes_slice);
        Some(Block::from(bytes))
    }
}

impl AsRef<[u8]> for Block {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl AsMut<[u8]> for Block {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        bytemuck::bytes_of_mut(self)
    }
}

impl std::ops::BitAnd for Block {
    type Output = Block;
    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Block(self.0 & rhs.0)
    }
}

impl std::ops::BitAndAssign for Block {
    #[inline]
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0
    }
}

impl std::ops::BitOr for Block {
    type Output = Block;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Block(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Block {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

impl std::ops::BitXor for Block {
    type Output = Block;
    #[inline]
    fn bitxor(self, rhs: Self) -> Self {
        Block(self.0 ^ rhs.0)
    }
}

impl std::ops::BitXorAssign for Block {
    #[inline]
    fn bitxor_assign(&mut self, rhs: Self) {
        self.0 ^= rhs.0
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for byte in self.as_ref().iter() {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for byte in self.as_ref().iter() {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl rand::distributions::Distribution<Block> for rand::distributions::Standard {
    #[inline]
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Block {
        Block(rng.gen::<u128>())
    }
}

impl From<Block> for u128 {
    #[inline]
    fn from(m: Block) -> u128 {
        m.0
    }
}

impl From<u128> for Block {
    #[inline]
    fn from(m: u128) -> Self {
        Block(m)
    }
}

impl From<Block> for [u8; 16] {
    #[inline]
    fn from(m: Block) -> [u8; 16] {
        m.0.to_le_bytes()
    }
}

impl From<[u8; 16]> for Block {
    #[inline]
    fn from(m: [u8; 16]) -> Self {
        Block(u128::from_le_bytes(m))
    }
}

/// Interpret a block as an element of the field GF(2^128), with the
/// arithmetic done modulo `X^128 + X^7 + X^2 + X + 1`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Gf128(pub Block);

impl Gf128 {
    /// The multiplicative identity.
    pub const ONE: Gf128 = Gf128(Block(1));
    /// The additive identity.
    pub const ZERO: Gf128 = Gf128(Block(0));

    /// Whether this is the zero element.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == Block::ZERO
    }

    /// Multiply a raw block by this field element.
    #[inline]
    pub fn mul_block(self, rhs: Block) -> Block {
        (self * Gf128(rhs)).0
    }

    /// Raise to the `e`-th power by square-and-multiply.
    pub fn pow(self, e: u128) -> Gf128 {
        let mut acc = Gf128::ONE;
        let mut sq = self;
        let mut e = e;
        while e != 0 {
            if e & 1 == 1 {
                acc = acc * sq;
            }
            sq = sq * sq;
            e >>= 1;
        }
        acc
    }

    /// The multiplicative inverse, computed as `self^(2^128 - 2)`.
    ///
    /// The inverse of zero is zero.
    pub fn inverse(self) -> Gf128 {
        self.pow(u128::MAX - 1)
    }
}

/// Carry-less multiplication of two 64-bit polynomials over GF(2).
#[inline]
fn clmul64(a: u64, b: u64) -> u128 {
    let mut r = 0u128;
    let mut b = b;
    while b != 0 {
        let i = b.trailing_zeros();
        r ^= (a as u128) << i;
        b &= b - 1;
    }
    r
}

/// Reduce a 256-bit polynomial `hi * X^128 + lo` modulo `X^128 + X^7 + X^2 + X + 1`.
#[inline]
fn gf128_reduce(hi: u128, lo: u128) -> u128 {
    let folded = lo ^ hi ^ (hi << 1) ^ (hi << 2) ^ (hi << 7);
    // Bits of `hi` shifted past position 127 wrap around once more.
    let carry = (hi >> 127) ^ (hi >> 126) ^ (hi >> 121);
    folded ^ carry ^ (carry << 1) ^ (carry << 2) ^ (carry << 7)
}

impl std::ops::Add for Gf128 {
    type Output = Self;

    #[inline]
    fn add(self, other: Gf128) -> Gf128 {
        Gf128(self.0 ^ other.0)
    }
}

impl std::ops::Sub for Gf128 {
    type Output = Self;

    #[inline]
    fn sub(self, other: Gf128) -> Gf128 {
        Gf128(self.0 ^ other.0)
    }
}

impl std::ops::Mul for Gf128 {
    type Output = Self;

    fn mul(self, other: Gf128) -> Gf128 {
        // Karatsuba over the 64-bit halves.
        let (a0, a1) = (self.0.low_u64(), self.0.high_u64());
        let (b0, b1) = (other.0.low_u64(), other.0.high_u64());
        let z0 = clmul64(a0, b0);
        let z2 = clmul64(a1, b1);
        let z1 = clmul64(a0 ^ a1, b0 ^ b1) ^ z0 ^ z2;
        let lo = z0 ^ (z1 << 64);
        let hi = z2 ^ (z1 >> 64);
        Gf128(Block(gf128_reduce(hi, lo)))
    }
}

impl From<Gf128> for Block {
    #[inline]
    fn from(f: Gf128) -> Self {
        f.0
    }
}

impl From<Block> for Gf128 {
    #[inline]
    fn from(block: Block) -> Self {
        Gf128(block)
    }
}
