//! The VOLE-backed oblivious PRF used by the intersection driver.
//!
//! The traits define the contract the driver relies on. The provided
//! instantiation runs the real OKVS-based evaluation (the receiver encodes
//! its inputs into the store, the sender decodes a masked copy), but the
//! VOLE correlation underneath comes from an **insecure** seed-revealing
//! dealer, standing in for a silent VOLE the way a dummy OT stands in for a
//! real one. Use it for tests and benchmarks only.

use crate::{
    errors::Error,
    okvs::{Fill, Okvs},
    params::DenseField,
};
use gimlet::{AbstractChannel, Aes128, AesHash, AesRng, Block, Gf128};
use itertools::Itertools;
use rand::{CryptoRng, Rng, RngCore, SeedableRng};

/// Items per bin of the OPRF's key-value store.
const OPRF_BIN_SIZE: usize = 1 << 14;
/// Row weight of the store.
const OPRF_WEIGHT: usize = 3;
/// Bound on fresh-seed retries after a singular encode.
const ENCODE_RETRIES: u64 = 8;

// Public constants both parties hash with.
const INPUT_HASH_KEY: Block = Block(0x9F38_6FD9_25A1_B14B_8D3C_45A1_77B1_02C3);
const OUTPUT_HASH_KEY: Block = Block(0x5B1E_52F8_6E09_AA44_91D0_3AF4_60E8_D1A7);
const SEED_SCHEDULE_KEY: Block = Block(0x1C6B_00F2_8840_93DE_21F7_55C0_9E33_4B65);

/// The store seed for a given retry attempt; both parties derive it.
fn okvs_seed(attempt: u64) -> Block {
    Aes128::new(SEED_SCHEDULE_KEY).encrypt(Block::from(attempt as u128))
}

/// Expand the dealer seed into the receiver's VOLE share `(A, C)`.
fn expand_vole(seed: Block, m: usize) -> (Vec<Block>, Vec<Block>) {
    let mut rng = AesRng::from_seed(seed);
    let mut a = vec![Block::ZERO; m];
    rng.fill_blocks(&mut a);
    let mut c = vec![Block::ZERO; m];
    rng.fill_blocks(&mut c);
    (a, c)
}

/// Trait for the sending side of the oblivious PRF.
pub trait VoleOprfSender {
    /// Run the setup against a receiver holding `receiver_size` inputs.
    fn send<C: AbstractChannel, RNG: CryptoRng + RngCore>(
        &mut self,
        channel: &mut C,
        receiver_size: usize,
        rng: &mut RNG,
        nthreads: usize,
        reduced_rounds: bool,
    ) -> Result<(), Error>;

    /// Evaluate the PRF on `inputs`. CPU-bound; requires a completed setup.
    fn eval(&self, inputs: &[Block], outputs: &mut [Block], nthreads: usize)
        -> Result<(), Error>;
}

/// Trait for the receiving side of the oblivious PRF: learns the PRF output
/// on each of its own inputs, and nothing else.
pub trait VoleOprfReceiver {
    fn receive<C: AbstractChannel, RNG: CryptoRng + RngCore>(
        &mut self,
        channel: &mut C,
        inputs: &[Block],
        outputs: &mut [Block],
        rng: &mut RNG,
        nthreads: usize,
        reduced_rounds: bool,
    ) -> Result<(), Error>;
}

/// Oblivious PRF sender.
pub struct Sender {
    ssp: usize,
    state: Option<SenderState>,
}

struct SenderState {
    okvs: Okvs,
    delta: Gf128,
    key: Vec<Block>,
}

impl Sender {
    pub fn new(ssp: usize) -> Self {
        Sender { ssp, state: None }
    }
}

impl VoleOprfSender for Sender {
    fn send<C: AbstractChannel, RNG: CryptoRng + RngCore>(
        &mut self,
        channel: &mut C,
        receiver_size: usize,
        rng: &mut RNG,
        _nthreads: usize,
        _reduced_rounds: bool,
    ) -> Result<(), Error> {
        let vole_seed = channel.read_block()?;
        let attempt = channel.read_u64()?;
        if attempt >= ENCODE_RETRIES {
            return Err(Error::ProtocolAbort(format!(
                "peer claimed encode attempt {}",
                attempt
            )));
        }
        let okvs = Okvs::new(
            receiver_size,
            OPRF_BIN_SIZE,
            OPRF_WEIGHT,
            self.ssp,
            DenseField::Gf128,
            okvs_seed(attempt),
        )?;
        let m = okvs.size();
        let d = channel.read_blocks(m)?;

        let mut delta = Gf128::from(rng.gen::<Block>());
        while delta.is_zero() {
            delta = Gf128::from(rng.gen::<Block>());
        }
        // The dealer hands the sender B = A ^ Δ·C; then
        // K = B ^ Δ·D = A ^ Δ·P, a share of the receiver's store.
        let (mut key, c) = expand_vole(vole_seed, m);
        for ((k, c), d) in key.iter_mut().zip(c.iter()).zip(d.iter()) {
            *k ^= delta.mul_block(*c ^ *d);
        }
        self.state = Some(SenderState { okvs, delta, key });
        Ok(())
    }

    fn eval(
        &self,
        inputs: &[Block],
        outputs: &mut [Block],
        nthreads: usize,
    ) -> Result<(), Error> {
        let Some(state) = self.state.as_ref() else {
            return Err(Error::MalformedInput("eval before setup".into()));
        };
        if outputs.len() != inputs.len() {
            return Err(Error::MalformedInput("output length mismatch".into()));
        }
        state
            .okvs
            .decode(inputs, outputs, 1, &state.key, nthreads, false)?;
        let h1 = AesHash::new(INPUT_HASH_KEY);
        let h2 = AesHash::new(OUTPUT_HASH_KEY);
        for (x, y) in inputs.iter().zip(outputs.iter_mut()) {
            // Decode(K, x) ^ Δ·H1(x) equals Decode(A, x) on encoded points.
            let masked = *y ^ state.delta.mul_block(h1.cr_hash(*x));
            *y = h2.tccr_hash(*x, masked);
        }
        Ok(())
    }
}

/// Oblivious PRF receiver.
pub struct Receiver {
    ssp: usize,
}

impl Receiver {
    pub fn new(ssp: usize) -> Self {
        Receiver { ssp }
    }
}

impl VoleOprfReceiver for Receiver {
    fn receive<C: AbstractChannel, RNG: CryptoRng + RngCore>(
        &mut self,
        channel: &mut C,
        inputs: &[Block],
        outputs: &mut [Block],
        rng: &mut RNG,
        nthreads: usize,
        reduced_rounds: bool,
    ) -> Result<(), Error> {
        if outputs.len() != inputs.len() {
            return Err(Error::MalformedInput("output length mismatch".into()));
        }
        let vole_seed: Block = rng.gen();
        channel.write_block(&vole_seed)?;
        if !reduced_rounds {
            channel.flush()?;
        }

        let h1 = AesHash::new(INPUT_HASH_KEY);
        let mut h1s = vec![Block::ZERO; inputs.len()];
        h1.cr_hash_blocks(inputs, &mut h1s);

        // Encode the store mapping x -> H1(x), reseeding on a singular core.
        let mut encoded = None;
        for attempt in 0..ENCODE_RETRIES {
            let okvs = Okvs::new(
                inputs.len(),
                OPRF_BIN_SIZE,
                OPRF_WEIGHT,
                self.ssp,
                DenseField::Gf128,
                okvs_seed(attempt),
            )?;
            let mut p = vec![Block::ZERO; okvs.size()];
            match okvs.solve(inputs, &h1s, 1, &mut p, Fill::Uniform(rng.gen()), nthreads) {
                Ok(()) => {
                    encoded = Some((attempt, okvs, p));
                    break;
                }
                Err(Error::EncodeRetry) => continue,
                Err(e) => return Err(e),
            }
        }
        let Some((attempt, okvs, p)) = encoded else {
            return Err(Error::EncodeRetry);
        };

        let (a, c) = expand_vole(vole_seed, okvs.size());
        let d = p
            .iter()
            .zip(c.iter())
            .map(|(p, c)| *p ^ *c)
            .collect_vec();
        channel.write_u64(attempt)?;
        channel.write_blocks(&d)?;
        channel.flush()?;

        okvs.decode(inputs, outputs, 1, &a, nthreads, false)?;
        let h2 = AesHash::new(OUTPUT_HASH_KEY);
        for (x, y) in inputs.iter().zip(outputs.iter_mut()) {
            *y = h2.tccr_hash(*x, *y);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gimlet::unix_channel_pair;

    // Both sides agree on the PRF value for shared keys, and (w.o.p.)
    // disagree elsewhere.
    #[test]
    fn test_sender_and_receiver_agree() {
        let n = 1000;
        let inputs: Vec<Block> = (0..n as u64).map(|i| Block::new(3, i)).collect();
        let (mut c1, mut c2) = unix_channel_pair();

        let thread_inputs = inputs.clone();
        let handle = std::thread::spawn(move || {
            let mut rng = AesRng::from_seed(Block::new(1, 1));
            let mut sender = Sender::new(40);
            sender.send(&mut c1, n, &mut rng, 2, false).unwrap();
            let mut outputs = vec![Block::ZERO; n];
            sender.eval(&thread_inputs, &mut outputs, 2).unwrap();
            outputs
        });

        let mut rng = AesRng::from_seed(Block::new(2, 2));
        let mut receiver = Receiver::new(40);
        let mut outputs = vec![Block::ZERO; n];
        receiver
            .receive(&mut c2, &inputs, &mut outputs, &mut rng, 2, false)
            .unwrap();
        let sender_outputs = handle.join().unwrap();
        assert_eq!(outputs, sender_outputs);
    }

    #[test]
    fn test_disjoint_inputs_disagree() {
        let n = 128;
        let recv_inputs: Vec<Block> = (0..n as u64).map(|i| Block::new(0, i)).collect();
        let send_inputs: Vec<Block> = (0..n as u64).map(|i| Block::new(1, i)).collect();
        let (mut c1, mut c2) = unix_channel_pair();

        let handle = std::thread::spawn(move || {
            let mut rng = AesRng::from_seed(Block::new(4, 4));
            let mut sender = Sender::new(40);
            sender.send(&mut c1, n, &mut rng, 1, false).unwrap();
            let mut outputs = vec![Block::ZERO; n];
            sender.eval(&send_inputs, &mut outputs, 1).unwrap();
            outputs
        });

        let mut rng = AesRng::from_seed(Block::new(5, 5));
        let mut receiver = Receiver::new(40);
        let mut outputs = vec![Block::ZERO; n];
        receiver
            .receive(&mut c2, &recv_inputs, &mut outputs, &mut rng, 1, false)
            .unwrap();
        let sender_outputs = handle.join().unwrap();
        for s in &sender_outputs {
            assert!(!outputs.contains(s));
        }
    }

    #[test]
    fn test_eval_before_setup_fails() {
        let sender = Sender::new(40);
        let mut out = [Block::ZERO];
        assert!(matches!(
            sender.eval(&[Block::ZERO], &mut out, 1),
            Err(Error::MalformedInput(_))
        ));
    }
}
