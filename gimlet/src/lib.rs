// -*- mode: rust; -*-
//
// This file is part of `gimlet`.
// See LICENSE for licensing information.

//! Core 128-bit machinery shared by the protocol crates: the [`Block`] type,
//! GF(2^128) arithmetic, AES-128 encryption and hashing, an AES-based random
//! number generator, and a minimal channel abstraction.

mod aes;
mod block;
pub mod channel;
mod hash_aes;
mod rand_aes;
pub mod utils;

pub use crate::{
    aes::Aes128,
    block::{Block, Gf128},
    channel::{AbstractChannel, Channel},
    hash_aes::AesHash,
    rand_aes::AesRng,
};

#[cfg(all(unix, feature = "unix"))]
pub use crate::channel::{unix_channel_pair, UnixChannel};

/// A marker trait denoting that the given scheme is semi-honest secure.
pub trait SemiHonest {}
/// A marker trait denoting that the given scheme is maliciously secure.
pub trait Malicious: SemiHonest {}
