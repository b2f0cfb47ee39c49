//! Run the two-party private set intersection over a unix socket pair, one
//! party per thread.

use gimlet::{unix_channel_pair, AesRng, Block};
use okapi::psi::{Receiver, Sender};

fn main() {
    let n = 1 << 12;
    let mut sender_inputs: Vec<Block> = (0..n as u64).map(|i| Block::new(1, i)).collect();
    let receiver_inputs: Vec<Block> = (0..n as u64).map(|i| Block::new(2, i)).collect();
    // Plant a few shared elements.
    for i in 0..128u64 {
        sender_inputs[(i * 17) as usize % n] = receiver_inputs[(i * 31) as usize % n];
    }

    let (mut c1, mut c2) = unix_channel_pair();
    let handle = std::thread::spawn(move || {
        let mut rng = AesRng::new();
        let mut psi = Sender::new(n, n, 40, false, 2);
        psi.run(&sender_inputs, &mut c1, &mut rng).unwrap();
    });

    let mut rng = AesRng::new();
    let mut psi = Receiver::new(n, n, 40, false, 2);
    let mut intersection = psi.run(&receiver_inputs, &mut c2, &mut rng).unwrap();
    handle.join().unwrap();
    intersection.sort_unstable();
    println!("intersection size: {}", intersection.len());
    println!("first indices: {:?}", &intersection[..intersection.len().min(8)]);
}
