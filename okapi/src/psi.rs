// -*- mode: rust; -*-
//
// This file is part of `okapi`.
// See LICENSE for licensing information.

//! The two-party private set intersection driver: run the oblivious PRF,
//! truncate the sender's PRF outputs to masks, ship them in one message,
//! and probe them against the receiver's own PRF outputs. The receiver
//! learns the intersection as indices into its input slice; neither party
//! learns anything else.

use crate::{
    errors::Error,
    fastmod::Divisor,
    oprf::{self, VoleOprfReceiver, VoleOprfSender},
    utils,
};
use gimlet::{AbstractChannel, Block};
use rand::{CryptoRng, Rng, RngCore};
use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hasher};
use std::sync::Mutex;

/// Bytes of each transmitted mask: enough that a collision among
/// `|S| * |R|` pairs occurs with probability below `2^-ssp`, never more
/// than a full block, and pinned to a full block in malicious mode.
pub fn compute_mask_size(
    ssp: usize,
    sender_size: usize,
    receiver_size: usize,
    malicious: bool,
) -> usize {
    if malicious {
        return 16;
    }
    let pairs = sender_size as u128 * receiver_size as u128;
    let log = if pairs <= 1 {
        0
    } else {
        128 - (pairs - 1).leading_zeros() as usize
    };
    std::cmp::min((ssp + log + 7) / 8, 16)
}

/// Masks are already pseudorandom, so the intersection map hashes by
/// passing their leading bytes straight through.
#[derive(Clone, Default)]
struct NoHash(u64);

impl Hasher for NoHash {
    #[inline]
    fn finish(&self) -> u64 {
        self.0
    }
    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        let mut b = [0u8; 8];
        let n = bytes.len().min(8);
        b[..n].copy_from_slice(&bytes[..n]);
        self.0 ^= u64::from_le_bytes(b);
    }
}

type MaskMap = HashMap<u128, u64, BuildHasherDefault<NoHash>>;

#[inline]
fn truncate(y: &Block, mask_size: usize) -> u128 {
    let mut b = [0u8; 16];
    b[..mask_size].copy_from_slice(y.prefix(mask_size));
    u128::from_le_bytes(b)
}

/// Private set intersection sender.
pub struct Sender {
    sender_size: usize,
    receiver_size: usize,
    ssp: usize,
    malicious: bool,
    no_compress: bool,
    nthreads: usize,
    oprf: oprf::Sender,
}

impl Sender {
    /// Set up a sender holding `sender_size` items against a receiver
    /// holding `receiver_size`.
    pub fn new(
        sender_size: usize,
        receiver_size: usize,
        ssp: usize,
        malicious: bool,
        nthreads: usize,
    ) -> Self {
        Sender {
            sender_size,
            receiver_size,
            ssp,
            malicious,
            no_compress: false,
            nthreads,
            oprf: oprf::Sender::new(ssp),
        }
    }

    /// Disable mask compression: always ship full 16-byte masks.
    pub fn set_no_compress(&mut self, no_compress: bool) {
        self.no_compress = no_compress;
    }

    fn mask_size(&self) -> usize {
        if self.no_compress {
            16
        } else {
            compute_mask_size(self.ssp, self.sender_size, self.receiver_size, self.malicious)
        }
    }

    /// Run the protocol over `inputs`.
    pub fn run<C: AbstractChannel, RNG: CryptoRng + RngCore>(
        &mut self,
        inputs: &[Block],
        channel: &mut C,
        rng: &mut RNG,
    ) -> Result<(), Error> {
        if inputs.len() != self.sender_size {
            return Err(Error::MalformedInput(format!(
                "expected {} sender inputs, got {}",
                self.sender_size,
                inputs.len()
            )));
        }
        self.oprf
            .send(channel, self.receiver_size, rng, self.nthreads, false)?;

        let mut ys = vec![Block::ZERO; inputs.len()];
        self.oprf.eval(inputs, &mut ys, self.nthreads)?;

        let mask_size = self.mask_size();
        let mut buf = Vec::with_capacity(inputs.len() * mask_size);
        for y in &ys {
            buf.extend_from_slice(y.prefix(mask_size));
        }
        channel.write_bytes(&buf)?;
        channel.flush()?;
        Ok(())
    }

    /// Run the protocol over arbitrary-length byte items. The sender draws
    /// the hashing key, shares it, and both parties compress their items to
    /// blocks before running the block protocol.
    pub fn run_bytes<C: AbstractChannel, RNG: CryptoRng + RngCore>(
        &mut self,
        inputs: &[Vec<u8>],
        channel: &mut C,
        rng: &mut RNG,
    ) -> Result<(), Error> {
        let key: Block = rng.gen();
        channel.write_block(&key)?;
        channel.flush()?;
        let inputs = utils::compress_and_hash_inputs(inputs, key);
        self.run(&inputs, channel, rng)
    }
}

/// Private set intersection receiver.
pub struct Receiver {
    sender_size: usize,
    receiver_size: usize,
    ssp: usize,
    malicious: bool,
    no_compress: bool,
    nthreads: usize,
    oprf: oprf::Receiver,
}

impl Receiver {
    /// Set up a receiver holding `receiver_size` items against a sender
    /// holding `sender_size`.
    pub fn new(
        sender_size: usize,
        receiver_size: usize,
        ssp: usize,
        malicious: bool,
        nthreads: usize,
    ) -> Self {
        Receiver {
            sender_size,
            receiver_size,
            ssp,
            malicious,
            no_compress: false,
            nthreads,
            oprf: oprf::Receiver::new(ssp),
        }
    }

    /// Disable mask compression: always expect full 16-byte masks.
    pub fn set_no_compress(&mut self, no_compress: bool) {
        self.no_compress = no_compress;
    }

    fn mask_size(&self) -> usize {
        if self.no_compress {
            16
        } else {
            compute_mask_size(self.ssp, self.sender_size, self.receiver_size, self.malicious)
        }
    }

    /// Run the protocol over `inputs`, returning the indices of the inputs
    /// that the sender also holds.
    pub fn run<C: AbstractChannel, RNG: CryptoRng + RngCore>(
        &mut self,
        inputs: &[Block],
        channel: &mut C,
        rng: &mut RNG,
    ) -> Result<Vec<u64>, Error> {
        if inputs.len() != self.receiver_size {
            return Err(Error::MalformedInput(format!(
                "expected {} receiver inputs, got {}",
                self.receiver_size,
                inputs.len()
            )));
        }
        let mut ys = vec![Block::ZERO; inputs.len()];
        self.oprf
            .receive(channel, inputs, &mut ys, rng, self.nthreads, false)?;

        let mask_size = self.mask_size();
        let mut masks = vec![0u8; self.sender_size * mask_size];
        channel.read_bytes(&mut masks).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::ProtocolAbort("peer sent a short mask buffer".into())
            } else {
                Error::IoError(e)
            }
        })?;

        if self.nthreads < 2 {
            Ok(Self::intersect(&ys, &masks, mask_size))
        } else {
            Ok(self.intersect_threaded(&ys, &masks, mask_size))
        }
    }

    /// Run the protocol over arbitrary-length byte items, compressing them
    /// to blocks under the key the sender shares.
    pub fn run_bytes<C: AbstractChannel, RNG: CryptoRng + RngCore>(
        &mut self,
        inputs: &[Vec<u8>],
        channel: &mut C,
        rng: &mut RNG,
    ) -> Result<Vec<u64>, Error> {
        let key = channel.read_block()?;
        let inputs = utils::compress_and_hash_inputs(inputs, key);
        self.run(&inputs, channel, rng)
    }

    fn intersect(ys: &[Block], masks: &[u8], mask_size: usize) -> Vec<u64> {
        let mut map = MaskMap::with_capacity_and_hasher(ys.len(), Default::default());
        for (j, y) in ys.iter().enumerate() {
            map.insert(truncate(y, mask_size), j as u64);
        }
        let mut intersection = Vec::new();
        for mask in masks.chunks_exact(mask_size) {
            let mut b = [0u8; 16];
            b[..mask_size].copy_from_slice(mask);
            if let Some(&j) = map.get(&u128::from_le_bytes(b)) {
                intersection.push(j);
            }
        }
        intersection
    }

    /// Threaded probe: both the local table and the peer masks are striped
    /// by `mask mod nthreads`, so each worker owns a disjoint key space and
    /// a disjoint hit list, merged under one mutex at the end.
    fn intersect_threaded(&self, ys: &[Block], masks: &[u8], mask_size: usize) -> Vec<u64> {
        let nt = self.nthreads;
        let stripe_div = Divisor::new(nt as u64);
        let intersection = Mutex::new(Vec::new());
        std::thread::scope(|s| {
            for t in 0..nt {
                let stripe_div = &stripe_div;
                let intersection = &intersection;
                s.spawn(move || {
                    let mut map =
                        MaskMap::with_capacity_and_hasher(ys.len() / nt + 1, Default::default());
                    for (j, y) in ys.iter().enumerate() {
                        let key = truncate(y, mask_size);
                        if stripe_div.modulo(key as u64) as usize == t {
                            map.insert(key, j as u64);
                        }
                    }
                    let mut hits = Vec::new();
                    for mask in masks.chunks_exact(mask_size) {
                        let mut b = [0u8; 16];
                        b[..mask_size].copy_from_slice(mask);
                        let key = u128::from_le_bytes(b);
                        if stripe_div.modulo(key as u64) as usize == t {
                            if let Some(&j) = map.get(&key) {
                                hits.push(j);
                            }
                        }
                    }
                    if !hits.is_empty() {
                        intersection.lock().unwrap().extend_from_slice(&hits);
                    }
                });
            }
        });
        intersection.into_inner().unwrap()
    }
}

impl gimlet::SemiHonest for Sender {}
impl gimlet::SemiHonest for Receiver {}
