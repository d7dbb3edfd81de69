// Checked byte-buffer reading for the wire codecs.
// Writers use `bytes::BufMut` on plain vectors; reads go through `ByteReader`
// so a truncated buffer surfaces as a typed error instead of a panic.

use crate::errors::{Error, Result};

/// A cursor over an immutable byte slice with length-checked reads.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume `len` bytes, failing if the buffer is shorter.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::ShortBuffer(format!(
                "needed {len} bytes, {} remaining",
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Consume everything left in the buffer.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_i32_le(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_i64_le(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_f64_le(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Read a fixed-size array.
    pub fn get_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        Ok(self.take(N)?.try_into().unwrap())
    }

    /// Read bytes up to (and consuming) a NUL terminator.
    pub fn get_cstring(&mut self) -> Result<&'a str> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::ShortBuffer("unterminated cstring".into()))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| Error::bad_value("cstring is not valid UTF-8"))?;
        self.pos += nul + 1;
        Ok(s)
    }

    /// Fail unless the buffer was fully consumed.
    pub fn expect_done(&self, what: &str) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::bad_value(format!(
                "{what}: {} trailing bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_length_checked() {
        let mut reader = ByteReader::new(&[1, 2, 3]);
        assert_eq!(reader.get_u8().unwrap(), 1);
        assert!(reader.get_u32_le().is_err());
    }

    #[test]
    fn cstring_requires_terminator() {
        let mut reader = ByteReader::new(b"abc\0rest");
        assert_eq!(reader.get_cstring().unwrap(), "abc");
        assert_eq!(reader.take_rest(), b"rest");

        let mut reader = ByteReader::new(b"abc");
        assert!(reader.get_cstring().is_err());
    }

    #[test]
    fn expect_done_flags_trailing_bytes() {
        let mut reader = ByteReader::new(&[9, 9]);
        reader.get_u8().unwrap();
        assert!(reader.expect_done("test").is_err());
        reader.get_u8().unwrap();
        assert!(reader.expect_done("test").is_ok());
    }
}
