//! LZC12/LZC16: Unix `compress`-style LZW with a growing code width (9
//! bits up to `max_bits`) and an explicit clear code, rather than the
//! fixed-width table in [`super::lzw`]. `max_bits` is 12 or 16
//! depending on which thread format is in play.

use std::io::{self, Read, Write};

use super::CodecContext;

const CLEAR_CODE: u16 = 256;
const FIRST_FREE_CODE: u16 = 257;
const MIN_BITS: u32 = 9;

struct VarBitWriter<W> {
    inner: W,
    bitbuf: u64,
    nbits: u32,
}

impl<W: Write> VarBitWriter<W> {
    fn new(inner: W) -> Self {
        VarBitWriter { inner, bitbuf: 0, nbits: 0 }
    }

    fn push(&mut self, code: u16, width: u32) -> io::Result<()> {
        self.bitbuf |= (code as u64) << self.nbits;
        self.nbits += width;
        while self.nbits >= 8 {
            self.inner.write_all(&[(self.bitbuf & 0xFF) as u8])?;
            self.bitbuf >>= 8;
            self.nbits -= 8;
        }
        Ok(())
    }

    fn finish(mut self) -> io::Result<W> {
        if self.nbits > 0 {
            self.inner.write_all(&[(self.bitbuf & 0xFF) as u8])?;
        }
        Ok(self.inner)
    }
}

struct VarBitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bitbuf: u64,
    nbits: u32,
}

impl<'a> VarBitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        VarBitReader { data, pos: 0, bitbuf: 0, nbits: 0 }
    }

    fn next(&mut self, width: u32) -> Option<u16> {
        while self.nbits < width {
            if self.pos >= self.data.len() {
                return None;
            }
            self.bitbuf |= (self.data[self.pos] as u64) << self.nbits;
            self.pos += 1;
            self.nbits += 8;
        }
        let code = (self.bitbuf & ((1u64 << width) - 1)) as u16;
        self.bitbuf >>= width;
        self.nbits -= width;
        Some(code)
    }
}

fn code_for(s: &[u8], table: &std::collections::HashMap<Vec<u8>, u16>) -> u16 {
    if s.len() == 1 {
        s[0] as u16
    } else {
        table[s]
    }
}

fn known(s: &[u8], table: &std::collections::HashMap<Vec<u8>, u16>) -> bool {
    s.len() == 1 || table.contains_key(s)
}

pub fn compress<R: Read + ?Sized, W: Write + ?Sized>(
    max_bits: u32,
    ctx: &CodecContext,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<u64> {
    let mut data = Vec::with_capacity(ctx.uncompressed_len as usize);
    reader.take(ctx.uncompressed_len).read_to_end(&mut data)?;

    let mut buf = Vec::new();
    let mut bw = VarBitWriter::new(&mut buf);
    let mut table: std::collections::HashMap<Vec<u8>, u16> = std::collections::HashMap::new();
    let mut next_code = FIRST_FREE_CODE;
    let mut width = MIN_BITS;
    let max_code: u16 = ((1u32 << max_bits) - 1) as u16;

    let mut current: Vec<u8> = Vec::new();
    for &byte in &data {
        let mut candidate = current.clone();
        candidate.push(byte);
        if current.is_empty() || known(&candidate, &table) {
            current = candidate;
            continue;
        }
        bw.push(code_for(&current, &table), width)?;
        if next_code <= max_code {
            table.insert(candidate, next_code);
            next_code += 1;
            while next_code > (1u16 << width).wrapping_sub(1) && width < max_bits {
                width += 1;
            }
        } else {
            bw.push(CLEAR_CODE, width)?;
            table.clear();
            next_code = FIRST_FREE_CODE;
            width = MIN_BITS;
        }
        current = vec![byte];
    }
    if !current.is_empty() {
        bw.push(code_for(&current, &table), width)?;
    }
    let buf = bw.finish()?;
    writer.write_all(buf)?;
    Ok(buf.len() as u64)
}

pub fn expand<R: Read + ?Sized, W: Write + ?Sized>(
    max_bits: u32,
    ctx: &CodecContext,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<()> {
    let mut data = Vec::new();
    reader.take(ctx.compressed_len).read_to_end(&mut data)?;
    let mut br = VarBitReader::new(&data);

    let fresh_table = || -> Vec<Vec<u8>> { (0u16..256).map(|b| vec![b as u8]).collect() };
    let mut table = fresh_table();
    let mut width = MIN_BITS;
    let mut out = Vec::with_capacity(ctx.uncompressed_len as usize);
    let mut prev: Option<Vec<u8>> = None;

    while let Some(code) = br.next(width) {
        if code == CLEAR_CODE {
            table = fresh_table();
            width = MIN_BITS;
            prev = None;
            continue;
        }
        let entry = if (code as usize) < table.len() {
            table[code as usize].clone()
        } else if code as usize == table.len() {
            let mut e = prev.clone().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "lzc stream references empty predecessor")
            })?;
            let first = e[0];
            e.push(first);
            e
        } else {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "lzc code out of range"));
        };
        out.extend_from_slice(&entry);
        if let Some(p) = prev {
            let mut new_entry = p;
            new_entry.push(entry[0]);
            table.push(new_entry);
            let next_len = table.len() as u32;
            while next_len > (1u32 << width) - 1 && width < max_bits {
                width += 1;
            }
        }
        prev = Some(entry);
    }

    writer.write_all(&out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_12_bit_codes() {
        let data = b"abcabcabcabcabcabcabcabcabcabcabcabc".to_vec();
        let ctx = CodecContext { uncompressed_len: data.len() as u64, compressed_len: 0 };
        let mut compressed = Vec::new();
        compress(12, &ctx, &mut data.as_slice(), &mut compressed).unwrap();

        let ctx2 = CodecContext { uncompressed_len: data.len() as u64, compressed_len: compressed.len() as u64 };
        let mut out = Vec::new();
        expand(12, &ctx2, &mut compressed.as_slice(), &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn round_trips_with_16_bit_codes() {
        let mut data = Vec::new();
        for i in 0..2000u32 {
            data.push((i % 251) as u8);
        }
        let ctx = CodecContext { uncompressed_len: data.len() as u64, compressed_len: 0 };
        let mut compressed = Vec::new();
        compress(16, &ctx, &mut data.as_slice(), &mut compressed).unwrap();

        let ctx2 = CodecContext { uncompressed_len: data.len() as u64, compressed_len: compressed.len() as u64 };
        let mut out = Vec::new();
        expand(16, &ctx2, &mut compressed.as_slice(), &mut out).unwrap();
        assert_eq!(out, data);
    }
}
