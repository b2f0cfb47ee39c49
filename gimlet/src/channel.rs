// -*- mode: rust; -*-
//
// This file is part of `gimlet`.
// See LICENSE for licensing information.

//! Module for encapsulating communication channels.

use crate::Block;
use std::{
    cell::RefCell,
    io::{Read, Result, Write},
    rc::Rc,
};

/// A trait for managing I/O. `AbstractChannel`s are clonable, and provide
/// basic read/write capabilities for both common and crate-specific types.
pub trait AbstractChannel {
    /// Read a slice of `u8`s from the channel.
    fn read_bytes(&mut self, bytes: &mut [u8]) -> Result<()>;
    /// Write a slice of `u8`s to the channel.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;
    /// Flush the channel.
    fn flush(&mut self) -> Result<()>;
    /// Clone the channel.
    fn clone(&self) -> Self
    where
        Self: Sized;

    /// Read `nbytes` from the channel, and return it as a `Vec`.
    fn read_vec(&mut self, nbytes: usize) -> Result<Vec<u8>> {
        let mut data = vec![0; nbytes];
        self.read_bytes(&mut data)?;
        Ok(data)
    }

    /// Write a `u64` to the channel.
    #[inline(always)]
    fn write_u64(&mut self, s: u64) -> Result<()> {
        self.write_bytes(&s.to_le_bytes())
    }

    /// Read a `u64` from the channel.
    #[inline(always)]
    fn read_u64(&mut self) -> Result<u64> {
        let mut data = [0u8; 8];
        self.read_bytes(&mut data)?;
        Ok(u64::from_le_bytes(data))
    }

    /// Write a `usize` to the channel.
    #[inline(always)]
    fn write_usize(&mut self, s: usize) -> Result<()> {
        self.write_u64(s as u64)
    }

    /// Read a `usize` from the channel.
    #[inline(always)]
    fn read_usize(&mut self) -> Result<usize> {
        Ok(self.read_u64()? as usize)
    }

    /// Write a `Block` to the channel.
    #[inline(always)]
    fn write_block(&mut self, b: &Block) -> Result<()> {
        self.write_bytes(b.as_ref())
    }

    /// Read a `Block` from the channel.
    #[inline(always)]
    fn read_block(&mut self) -> Result<Block> {
        let mut v = Block::default();
        self.read_bytes(v.as_mut())?;
        Ok(v)
    }

    /// Write a slice of `Block`s to the channel.
    #[inline(always)]
    fn write_blocks(&mut self, blocks: &[Block]) -> Result<()> {
        self.write_bytes(bytemuck::cast_slice(blocks))
    }

    /// Read `n` `Block`s from the channel.
    #[inline(always)]
    fn read_blocks(&mut self, n: usize) -> Result<Vec<Block>> {
        let mut blocks = vec![Block::default(); n];
        self.read_bytes(bytemuck::cast_slice_mut(&mut blocks))?;
        Ok(blocks)
    }
}

/// A standard read/write channel that implements `AbstractChannel`.
pub struct Channel<R, W> {
    reader: Rc<RefCell<R>>,
    writer: Rc<RefCell<W>>,
}

impl<R: Read, W: Write> Channel<R, W> {
    /// Make a new `Channel` from a `reader` and a `writer`.
    pub fn new(reader: R, writer: W) -> Self {
        let reader = Rc::new(RefCell::new(reader));
        let writer = Rc::new(RefCell::new(writer));
        Self { reader, writer }
    }

    /// Return a reader object wrapped in `Rc<RefCell>`.
    pub fn reader(self) -> Rc<RefCell<R>> {
        self.reader
    }

    /// Return a writer object wrapped in `Rc<RefCell>`.
    pub fn writer(self) -> Rc<RefCell<W>> {
        self.writer
    }
}

impl<R: Read, W: Write> AbstractChannel for Channel<R, W> {
    #[inline(always)]
    fn read_bytes(&mut self, bytes: &mut [u8]) -> Result<()> {
        self.reader.borrow_mut().read_exact(bytes)
    }

    #[inline(always)]
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.borrow_mut().write_all(bytes)
    }

    #[inline(always)]
    fn flush(&mut self) -> Result<()> {
        self.writer.borrow_mut().flush()
    }

    #[inline(always)]
    fn clone(&self) -> Self {
        Self {
            reader: Rc::clone(&self.reader),
            writer: Rc::clone(&self.writer),
        }
    }
}

#[cfg(all(unix, feature = "unix"))]
mod unix {
    use super::Channel;
    use std::{
        io::{BufReader, BufWriter},
        os::unix::net::UnixStream,
    };

    /// A channel for communicating between threads over a unix socket pair.
    pub type UnixChannel = Channel<BufReader<UnixStream>, BufWriter<UnixStream>>;

    /// Connect two `UnixChannel`s, returning them as a pair.
    pub fn unix_channel_pair() -> (UnixChannel, UnixChannel) {
        let (tx, rx) = UnixStream::pair().unwrap();
        let sender = Channel::new(
            BufReader::new(tx.try_clone().unwrap()),
            BufWriter::new(tx),
        );
        let receiver = Channel::new(
            BufReader::new(rx.try_clone().unwrap()),
            BufWriter::new(rx),
        );
        (sender, receiver)
    }
}

#[cfg(all(unix, feature = "unix"))]
pub use unix::{unix_channel_pair, UnixChannel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let (mut a, mut b) = unix_channel_pair();
        let handle = std::thread::spawn(move || {
            a.write_u64(42).unwrap();
            a.write_block(&Block::new(7, 9)).unwrap();
            a.write_bytes(&[1, 2, 3]).unwrap();
            a.flush().unwrap();
        });
        assert_eq!(b.read_u64().unwrap(), 42);
        assert_eq!(b.read_block().unwrap(), Block::new(7, 9));
        assert_eq!(b.read_vec(3).unwrap(), vec![1, 2, 3]);
        handle.join().unwrap();
    }
}
