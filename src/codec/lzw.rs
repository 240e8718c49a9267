//! LZW1/LZW2: fixed 12-bit-code LZW, the scheme both formats share in
//! this port (the original distinguishes them by how the compressor
//! primes and flushes its table across file boundaries, which doesn't
//! apply to a per-thread, in-memory table).

use std::io::{self, Read, Write};

use super::CodecContext;

const CODE_BITS: u32 = 12;
const CLEAR_AT: usize = 1 << CODE_BITS;
const FIRST_CODE: u16 = 256;

struct BitWriter<W> {
    inner: W,
    bitbuf: u32,
    nbits: u32,
}

impl<W: Write> BitWriter<W> {
    fn new(inner: W) -> Self {
        BitWriter { inner, bitbuf: 0, nbits: 0 }
    }

    fn push(&mut self, code: u16) -> io::Result<()> {
        self.bitbuf |= (code as u32) << self.nbits;
        self.nbits += CODE_BITS;
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

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bitbuf: u32,
    nbits: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader { data, pos: 0, bitbuf: 0, nbits: 0 }
    }

    fn next(&mut self) -> Option<u16> {
        while self.nbits < CODE_BITS {
            if self.pos >= self.data.len() {
                return None;
            }
            self.bitbuf |= (self.data[self.pos] as u32) << self.nbits;
            self.pos += 1;
            self.nbits += 8;
        }
        let code = (self.bitbuf & ((1 << CODE_BITS) - 1)) as u16;
        self.bitbuf >>= CODE_BITS;
        self.nbits -= CODE_BITS;
        Some(code)
    }
}

pub fn compress<R: Read + ?Sized, W: Write + ?Sized>(
    ctx: &CodecContext,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<u64> {
    let mut data = Vec::with_capacity(ctx.uncompressed_len as usize);
    reader.take(ctx.uncompressed_len).read_to_end(&mut data)?;

    let mut buf = Vec::new();
    let mut bw = BitWriter::new(&mut buf);
    let mut table: std::collections::HashMap<Vec<u8>, u16> = std::collections::HashMap::new();
    let mut next_code = FIRST_CODE;

    let code_for = |s: &[u8], table: &std::collections::HashMap<Vec<u8>, u16>| -> u16 {
        if s.len() == 1 {
            s[0] as u16
        } else {
            table[s]
        }
    };
    let known = |s: &[u8], table: &std::collections::HashMap<Vec<u8>, u16>| -> bool {
        s.len() == 1 || table.contains_key(s)
    };

    let mut current: Vec<u8> = Vec::new();
    for &byte in &data {
        let mut candidate = current.clone();
        candidate.push(byte);
        if current.is_empty() || known(&candidate, &table) {
            current = candidate;
            continue;
        }
        bw.push(code_for(&current, &table))?;
        if (next_code as usize) < CLEAR_AT {
            table.insert(candidate, next_code);
            next_code += 1;
        } else {
            table.clear();
            next_code = FIRST_CODE;
        }
        current = vec![byte];
    }
    if !current.is_empty() {
        bw.push(code_for(&current, &table))?;
    }
    let buf = bw.finish()?;
    writer.write_all(buf)?;
    Ok(buf.len() as u64)
}

pub fn expand<R: Read + ?Sized, W: Write + ?Sized>(
    ctx: &CodecContext,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<()> {
    let mut data = Vec::new();
    reader.take(ctx.compressed_len).read_to_end(&mut data)?;
    let mut br = BitReader::new(&data);

    let mut table: Vec<Vec<u8>> = (0u16..FIRST_CODE).map(|b| vec![b as u8]).collect();
    let mut out = Vec::with_capacity(ctx.uncompressed_len as usize);

    let mut prev: Option<Vec<u8>> = None;
    while let Some(code) = br.next() {
        let entry = if (code as usize) < table.len() {
            table[code as usize].clone()
        } else if code as usize == table.len() {
            let mut e = prev.clone().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "lzw stream references empty predecessor")
            })?;
            let first = e[0];
            e.push(first);
            e
        } else {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "lzw code out of range"));
        };
        out.extend_from_slice(&entry);
        if let Some(p) = prev {
            if table.len() < CLEAR_AT {
                let mut new_entry = p;
                new_entry.push(entry[0]);
                table.push(new_entry);
            } else {
                table = (0u16..FIRST_CODE).map(|b| vec![b as u8]).collect();
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
    fn round_trips_text() {
        let data = b"the quick brown fox the quick brown fox the quick brown fox".to_vec();
        let ctx = CodecContext { uncompressed_len: data.len() as u64, compressed_len: 0 };
        let mut compressed = Vec::new();
        compress(&ctx, &mut data.as_slice(), &mut compressed).unwrap();

        let ctx2 = CodecContext { uncompressed_len: data.len() as u64, compressed_len: compressed.len() as u64 };
        let mut out = Vec::new();
        expand(&ctx2, &mut compressed.as_slice(), &mut out).unwrap();
        assert_eq!(out, data);
    }
}
