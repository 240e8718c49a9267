//! Archive-wide configuration values.
//!
//! The original C library exposes these through a `NuValueID`/`NuValue`
//! get/set pair because that's what a stable C ABI needs; a Rust port
//! has no such constraint, so each value is a typed field on [`Config`]
//! with its own getter/setter on [`crate::archive::Archive`]. Every
//! named value and legal range from the format spec is preserved.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::funnel::EolTarget;

pub const MAX_JUNK_SKIP: u32 = 8192;
pub const DEFAULT_JUNK_SKIP: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ConvertEol {
    Off = 0,
    On = 1,
    Auto = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum EolStyle {
    Unknown = 0,
    Lf = 1,
    Cr = 2,
    CrLf = 3,
}

/// Data-compression selector exposed to callers; resolves to a
/// [`crate::thread::ThreadFormat`] (possibly degrading to Uncompressed
/// if the codec was compiled out, see [`Config::resolve_format`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Sq = 1,
    Lzw1 = 2,
    Lzw2 = 3,
    Lzc12 = 4,
    Lzc16 = 5,
    Deflate = 6,
    Bzip2 = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum HandleExisting {
    MaybeOverwrite = 0,
    NeverOverwrite = 1,
    AlwaysOverwrite = 2,
    MustOverwrite = 3,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub allow_duplicates: bool,
    pub convert_extracted_eol: ConvertEol,
    pub data_compression: Compression,
    pub discard_wrapper: bool,
    pub eol: EolStyle,
    pub handle_existing: HandleExisting,
    pub ignore_crc: bool,
    pub mask_dataless: bool,
    pub mimic_shk: bool,
    pub modify_orig: bool,
    pub only_update_older: bool,
    pub strip_high_ascii: bool,
    pub junk_skip_max: u32,
    pub ignore_lzw2_len: bool,
    pub handle_bad_mac: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            allow_duplicates: false,
            convert_extracted_eol: ConvertEol::Off,
            data_compression: if cfg!(feature = "codec-lzw") {
                Compression::Lzw2
            } else {
                Compression::None
            },
            discard_wrapper: false,
            eol: EolStyle::Lf,
            handle_existing: HandleExisting::MaybeOverwrite,
            ignore_crc: false,
            mask_dataless: false,
            mimic_shk: false,
            modify_orig: false,
            only_update_older: false,
            strip_high_ascii: false,
            junk_skip_max: DEFAULT_JUNK_SKIP,
            ignore_lzw2_len: false,
            handle_bad_mac: false,
        }
    }
}

impl Config {
    pub fn set_junk_skip_max(&mut self, value: u32) -> Result<(), crate::error::NufxError> {
        if value > MAX_JUNK_SKIP {
            return Err(crate::error::NufxError::InvalidArg("junk_skip_max exceeds 8192"));
        }
        self.junk_skip_max = value;
        Ok(())
    }

    /// Resolve a requested [`Compression`] to the thread format the
    /// engine will actually write, downgrading to Uncompressed (with a
    /// warning) if the codec was compiled out — mirrors
    /// `Nu_ConvertCompressValToFormat`'s degrade-and-warn behavior.
    pub fn resolve_format(&self, requested: Compression) -> crate::thread::ThreadFormat {
        use crate::thread::ThreadFormat;
        let (format, enabled) = match requested {
            Compression::None => (ThreadFormat::Uncompressed, true),
            Compression::Sq => (ThreadFormat::HuffmanSq, cfg!(feature = "codec-sq")),
            Compression::Lzw1 => (ThreadFormat::Lzw1, cfg!(feature = "codec-lzw")),
            Compression::Lzw2 => (ThreadFormat::Lzw2, cfg!(feature = "codec-lzw")),
            Compression::Lzc12 => (ThreadFormat::Lzc12, cfg!(feature = "codec-lzc")),
            Compression::Lzc16 => (ThreadFormat::Lzc16, cfg!(feature = "codec-lzc")),
            Compression::Deflate => (ThreadFormat::Deflate, cfg!(feature = "codec-deflate")),
            Compression::Bzip2 => (ThreadFormat::Bzip2, cfg!(feature = "codec-bzip2")),
        };
        if enabled {
            format
        } else {
            tracing::warn!(?format, "unsupported compression requested, storing uncompressed");
            ThreadFormat::Uncompressed
        }
    }

    /// Compute the concrete EOL conversion a sink should apply, given
    /// the per-call `ConvertEol` mode (a sink may override the archive
    /// default) and the archive's target `EolStyle`.
    pub fn effective_eol_target(&self, convert: ConvertEol, is_text_guess: bool) -> EolTarget {
        let enabled = match convert {
            ConvertEol::Off => false,
            ConvertEol::On => true,
            ConvertEol::Auto => is_text_guess,
        };
        if !enabled {
            return EolTarget::None;
        }
        match self.eol {
            EolStyle::Unknown => EolTarget::None,
            EolStyle::Lf => EolTarget::Lf,
            EolStyle::Cr => EolTarget::Cr,
            EolStyle::CrLf => EolTarget::CrLf,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn junk_skip_rejects_over_max() {
        let mut cfg = Config::default();
        assert!(cfg.set_junk_skip_max(MAX_JUNK_SKIP).is_ok());
        assert!(cfg.set_junk_skip_max(MAX_JUNK_SKIP + 1).is_err());
    }

    #[test]
    fn eol_target_off_when_disabled() {
        let cfg = Config::default();
        assert_eq!(cfg.effective_eol_target(ConvertEol::Off, true), EolTarget::None);
    }
}
