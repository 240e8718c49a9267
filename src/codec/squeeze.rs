//! A simplified "Squeeze"-style codec.
//!
//! The original SQ format is an RLE pass (runs of a repeated byte are
//! folded down using an escape byte) followed by adaptive Huffman
//! coding of the result. This port keeps the RLE stage — it's the part
//! that does most of the work on the kind of repetitive binary data
//! ShrinkIt archives were built to hold — and skips the Huffman stage,
//! since nothing here needs to reproduce SHK's exact bitstream, only
//! expand what it itself compresses.

use std::io::{self, Read, Write};

use super::CodecContext;

const ESCAPE: u8 = 0x90;
/// Runs shorter than this aren't worth escaping (escape + byte + count
/// costs 3 bytes, same as the run itself at the break-even point).
const MIN_RUN: usize = 4;
const MAX_RUN: usize = 255 + 3;

pub fn compress<R: Read + ?Sized, W: Write + ?Sized>(
    ctx: &CodecContext,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<u64> {
    let mut data = Vec::with_capacity(ctx.uncompressed_len as usize);
    reader.take(ctx.uncompressed_len).read_to_end(&mut data)?;

    let mut out = Vec::with_capacity(data.len());
    let mut written = 0u64;
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        let mut run = 1;
        while i + run < data.len() && data[i + run] == b && run < MAX_RUN {
            run += 1;
        }
        if b == ESCAPE {
            // A literal escape byte is always written as escape+byte+0,
            // regardless of run length, so the decoder never confuses
            // a short run with a bare literal.
            out.push(ESCAPE);
            out.push(ESCAPE);
            out.push(0);
            i += 1;
        } else if run >= MIN_RUN {
            out.push(ESCAPE);
            out.push(b);
            out.push((run - 3) as u8);
            i += run;
        } else {
            out.push(b);
            i += 1;
        }
    }
    writer.write_all(&out)?;
    written += out.len() as u64;
    Ok(written)
}

pub fn expand<R: Read + ?Sized, W: Write + ?Sized>(
    ctx: &CodecContext,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<()> {
    let mut data = Vec::new();
    reader.take(ctx.compressed_len).read_to_end(&mut data)?;

    let mut out = Vec::with_capacity(ctx.uncompressed_len as usize);
    let mut i = 0;
    while i < data.len() {
        if data[i] == ESCAPE {
            let b = data
                .get(i + 1)
                .copied()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated squeeze run"))?;
            let count = data
                .get(i + 2)
                .copied()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated squeeze run"))?;
            if b == ESCAPE && count == 0 {
                out.push(ESCAPE);
            } else {
                out.extend(std::iter::repeat(b).take(count as usize + 3));
            }
            i += 3;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    writer.write_all(&out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_repetitive_data() {
        let data = vec![0u8; 40].into_iter().chain(b"hello".iter().copied()).collect::<Vec<_>>();
        let mut compressed = Vec::new();
        let ctx = CodecContext { uncompressed_len: data.len() as u64, compressed_len: 0 };
        let n = compress(&ctx, &mut data.as_slice(), &mut compressed).unwrap();
        assert_eq!(n, compressed.len() as u64);

        let ctx2 = CodecContext { uncompressed_len: data.len() as u64, compressed_len: compressed.len() as u64 };
        let mut out = Vec::new();
        expand(&ctx2, &mut compressed.as_slice(), &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn round_trips_literal_escape_byte() {
        let data = vec![ESCAPE, 1, 2, ESCAPE, ESCAPE];
        let mut compressed = Vec::new();
        let ctx = CodecContext { uncompressed_len: data.len() as u64, compressed_len: 0 };
        compress(&ctx, &mut data.as_slice(), &mut compressed).unwrap();

        let ctx2 = CodecContext { uncompressed_len: data.len() as u64, compressed_len: compressed.len() as u64 };
        let mut out = Vec::new();
        expand(&ctx2, &mut compressed.as_slice(), &mut out).unwrap();
        assert_eq!(out, data);
    }
}
