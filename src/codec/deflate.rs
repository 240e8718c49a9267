//! Deflate, via `flate2`. Raw deflate streams (no zlib/gzip framing),
//! since the thread header already carries both lengths and the CRC.

use std::io::{self, Read, Write};

use super::CodecContext;

#[cfg(feature = "codec-deflate")]
pub fn compress<R: Read + ?Sized, W: Write + ?Sized>(
    ctx: &CodecContext,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<u64> {
    use flate2::write::DeflateEncoder;
    use flate2::Compression;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    io::copy(&mut reader.take(ctx.uncompressed_len), &mut encoder)?;
    let compressed = encoder.finish()?;
    writer.write_all(&compressed)?;
    Ok(compressed.len() as u64)
}

#[cfg(not(feature = "codec-deflate"))]
pub fn compress<R: Read + ?Sized, W: Write + ?Sized>(
    _ctx: &CodecContext,
    _reader: &mut R,
    _writer: &mut W,
) -> io::Result<u64> {
    unreachable!("gated by codec_feature")
}

#[cfg(feature = "codec-deflate")]
pub fn expand<R: Read + ?Sized, W: Write + ?Sized>(
    ctx: &CodecContext,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<()> {
    use flate2::read::DeflateDecoder;

    let limited = reader.take(ctx.compressed_len);
    let mut decoder = DeflateDecoder::new(limited);
    io::copy(&mut decoder, writer)?;
    Ok(())
}

#[cfg(not(feature = "codec-deflate"))]
pub fn expand<R: Read + ?Sized, W: Write + ?Sized>(
    _ctx: &CodecContext,
    _reader: &mut R,
    _writer: &mut W,
) -> io::Result<()> {
    unreachable!("gated by codec_feature")
}
