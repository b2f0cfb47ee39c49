// -*- mode: rust; -*-
//
// This file is part of `okapi`.
// See LICENSE for licensing information.

//! Private set intersection from a VOLE-backed oblivious PRF and a batched,
//! binned PaXoS oblivious key-value store.
//!
//! The data plane lives in [`Okvs`]: a hash routes each 128-bit item to a
//! bin, every bin is an independent sparse linear system solved by peeling
//! plus a small dense core, and the concatenated solution `P` decodes any
//! encoded key back to its value while looking uniform everywhere else. The
//! [`psi`] module drives the two-party protocol on top.

mod errors;
mod fastmod;
mod hashing;
mod okvs;
mod params;
mod paxos;

pub mod oprf;
pub mod psi;
pub mod utils;

pub use crate::{
    errors::Error,
    okvs::{Fill, Okvs},
    params::{bin_size_bound, DenseField, PaxosParam},
};
