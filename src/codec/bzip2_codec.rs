//! Bzip2, via the `bzip2` crate.

use std::io::{self, Read, Write};

use super::CodecContext;

#[cfg(feature = "codec-bzip2")]
pub fn compress<R: Read + ?Sized, W: Write + ?Sized>(
    ctx: &CodecContext,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<u64> {
    use bzip2::write::BzEncoder;
    use bzip2::Compression;

    let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
    io::copy(&mut reader.take(ctx.uncompressed_len), &mut encoder)?;
    let compressed = encoder.finish()?;
    writer.write_all(&compressed)?;
    Ok(compressed.len() as u64)
}

#[cfg(not(feature = "codec-bzip2"))]
pub fn compress<R: Read + ?Sized, W: Write + ?Sized>(
    _ctx: &CodecContext,
    _reader: &mut R,
    _writer: &mut W,
) -> io::Result<u64> {
    unreachable!("gated by codec_feature")
}

#[cfg(feature = "codec-bzip2")]
pub fn expand<R: Read + ?Sized, W: Write + ?Sized>(
    ctx: &CodecContext,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<()> {
    use bzip2::read::BzDecoder;

    let limited = reader.take(ctx.compressed_len);
    let mut decoder = BzDecoder::new(limited);
    io::copy(&mut decoder, writer)?;
    Ok(())
}

#[cfg(not(feature = "codec-bzip2"))]
pub fn expand<R: Read + ?Sized, W: Write + ?Sized>(
    _ctx: &CodecContext,
    _reader: &mut R,
    _writer: &mut W,
) -> io::Result<()> {
    unreachable!("gated by codec_feature")
}
