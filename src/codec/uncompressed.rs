//! The no-op codec: the payload is stored verbatim, so expand and
//! compress are both a straight byte copy.

use std::io::{self, Read, Write};

use super::CodecContext;

pub fn expand<R: Read + ?Sized, W: Write + ?Sized>(
    ctx: &CodecContext,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<()> {
    let mut limited = reader.take(ctx.uncompressed_len);
    io::copy(&mut limited, writer)?;
    Ok(())
}

pub fn compress<R: Read + ?Sized, W: Write + ?Sized>(
    ctx: &CodecContext,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<u64> {
    let mut limited = reader.take(ctx.uncompressed_len);
    io::copy(&mut limited, writer)
}
