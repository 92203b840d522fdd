use crate::error::Error;
use std::io::{Read, Write};
use tracing::warn;

/// Byte reader with a bit-level cursor for sub-byte fields.
///
/// Bits are consumed MSB-first within each byte and cross byte boundaries
/// silently. Byte-oriented reads require the cursor to sit on a byte
/// boundary and fail with [`Error::MisalignedBits`] otherwise.
#[derive(Debug)]
pub struct BitReader<R> {
    inner: R,
    /// One byte of lookahead, filled by [`BitReader::at_end`].
    peeked: Option<u8>,
    /// Bytes pulled from the underlying reader.
    pos: usize,
    /// Bit offset in [0, 7]; nonzero means `current` is partially consumed.
    bit: u8,
    current: u8,
}

impl<R: Read> BitReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            peeked: None,
            pos: 0,
            bit: 0,
            current: 0,
        }
    }

    /// Bytes pulled from the underlying reader so far, including a byte
    /// that is only partially bit-consumed.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn bit_offset(&self) -> u8 {
        self.bit
    }

    pub fn is_aligned(&self) -> bool {
        self.bit == 0
    }

    /// Consumed length in bits.
    pub fn position_bits(&self) -> usize {
        if self.bit == 0 {
            self.pos * 8
        } else {
            (self.pos - 1) * 8 + usize::from(self.bit)
        }
    }

    /// Whether the underlying stream has no more bytes, buffering one byte
    /// of lookahead to find out.
    pub fn at_end(&mut self) -> Result<bool, Error> {
        if self.peeked.is_some() || self.bit != 0 {
            return Ok(false);
        }
        let mut byte = [0u8; 1];
        match self.inner.read(&mut byte).map_err(Error::from_io)? {
            0 => Ok(true),
            _ => {
                self.peeked = Some(byte[0]);
                Ok(false)
            }
        }
    }

    fn pull(&mut self) -> Result<u8, Error> {
        if let Some(byte) = self.peeked.take() {
            self.pos += 1;
            return Ok(byte);
        }
        let mut byte = [0u8; 1];
        self.inner.read_exact(&mut byte).map_err(Error::from_io)?;
        self.pos += 1;
        Ok(byte[0])
    }

    fn check_aligned(&self) -> Result<(), Error> {
        if self.bit != 0 {
            Err(Error::MisalignedBits(self.bit))
        } else {
            Ok(())
        }
    }

    /// Read exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        self.check_aligned()?;
        let mut buf = vec![0u8; n];
        let mut offset = 0;
        if n > 0 {
            if let Some(byte) = self.peeked.take() {
                buf[0] = byte;
                offset = 1;
            }
        }
        self.inner
            .read_exact(&mut buf[offset..])
            .map_err(Error::from_io)?;
        self.pos += n;
        Ok(buf)
    }

    /// Read all remaining bytes.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>, Error> {
        self.check_aligned()?;
        let mut buf = Vec::new();
        if let Some(byte) = self.peeked.take() {
            buf.push(byte);
        }
        self.inner.read_to_end(&mut buf).map_err(Error::from_io)?;
        self.pos += buf.len();
        Ok(buf)
    }

    /// Scan forward in `step`-byte strides until the buffered tail equals
    /// `terminator`. Returns the bytes before the terminator and whether it
    /// was found; the terminator itself is consumed when found. When the
    /// stream ends first, everything read so far is returned with `false`.
    pub fn read_until(&mut self, terminator: &[u8], step: usize) -> Result<(Vec<u8>, bool), Error> {
        self.check_aligned()?;
        let step = step.max(1);
        let mut out = Vec::new();
        if terminator.is_empty() {
            return Ok((out, true));
        }
        loop {
            for _ in 0..step {
                match self.pull() {
                    Ok(b) => out.push(b),
                    Err(Error::StreamExhausted) => return Ok((out, false)),
                    Err(e) => return Err(e),
                }
            }
            if out.len() >= terminator.len() && out.ends_with(terminator) {
                out.truncate(out.len() - terminator.len());
                return Ok((out, true));
            }
        }
    }

    /// Read `n` bits (n <= 64) MSB-first as an unsigned integer.
    pub fn read_bits(&mut self, n: usize) -> Result<u64, Error> {
        debug_assert!(n <= 64);
        let mut value = 0u64;
        for _ in 0..n {
            if self.bit == 0 {
                self.current = self.pull()?;
            }
            let bit = (self.current >> (7 - self.bit)) & 1;
            self.bit = (self.bit + 1) % 8;
            value = (value << 1) | u64::from(bit);
        }
        Ok(value)
    }

    /// Discard the remaining bits of the current byte, if any.
    pub fn realign(&mut self) {
        self.bit = 0;
    }
}

/// Byte writer with a bit-level cursor, symmetric to [`BitReader`].
#[derive(Debug)]
pub struct BitWriter<W> {
    inner: W,
    /// Whole bytes flushed to the underlying writer.
    pos: usize,
    bit: u8,
    current: u8,
}

impl<W: Write> BitWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pos: 0,
            bit: 0,
            current: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn bit_offset(&self) -> u8 {
        self.bit
    }

    pub fn is_aligned(&self) -> bool {
        self.bit == 0
    }

    pub fn position_bits(&self) -> usize {
        self.pos * 8 + usize::from(self.bit)
    }

    fn check_aligned(&self) -> Result<(), Error> {
        if self.bit != 0 {
            Err(Error::MisalignedBits(self.bit))
        } else {
            Ok(())
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.check_aligned()?;
        self.inner.write_all(bytes)?;
        self.pos += bytes.len();
        Ok(())
    }

    /// Write the low `n` bits (n <= 64) of `value` MSB-first.
    pub fn write_bits(&mut self, value: u64, n: usize) -> Result<(), Error> {
        debug_assert!(n <= 64);
        for i in (0..n).rev() {
            let bit = ((value >> i) & 1) as u8;
            self.current |= bit << (7 - self.bit);
            self.bit += 1;
            if self.bit == 8 {
                self.inner.write_all(&[self.current])?;
                self.pos += 1;
                self.bit = 0;
                self.current = 0;
            }
        }
        Ok(())
    }

    /// Pad with `pad_bit` up to the next byte boundary, if mid-byte.
    pub fn realign(&mut self, pad_bit: u8) -> Result<(), Error> {
        while self.bit != 0 {
            self.write_bits(u64::from(pad_bit & 1), 1)?;
        }
        Ok(())
    }

    /// Flush the underlying writer, zero-padding a dangling partial byte.
    pub fn finish(&mut self) -> Result<(), Error> {
        if self.bit != 0 {
            warn!(
                bits = self.bit,
                "Padding a partial trailing byte with zero bits"
            );
            self.realign(0)?;
        }
        self.inner.flush()?;
        Ok(())
    }
}
