//! # Context Image
//!
//! A saved graphics context is a flat little-endian blob written by the
//! ctxsw ucode. Its headers are laid out back to back at the start:
//!
//! ```text
//!  0x000            main header        (magic, GPC count, extended ctl)
//!  fecs_header      FECS local header  (magic, SYS segment offset)
//!  + gpccs * 1      GPC0 local header  (magic, segment offset, TPC/PPC info)
//!  + gpccs * 2      GPC1 local header
//!  ...
//!  ext_offset*256   extended buffer    (SM perf counter control, 256 B segments)
//! ```
//!
//! [`CtxImage`] reads those headers with bounds checks and magic validation.
//! [`OffsetResolver`] uses them to locate the saved copy of a register.

mod hwpm;
mod offset;

pub use hwpm::HwpmMap;
pub use offset::OffsetResolver;

use magma_core::{Error, Result};

use crate::hw::{CtxswProgLayout, Litter};

// =============================================================================
// HEADER FIELDS
// =============================================================================

const EXTENDED_BUFFER_CTL_OFFSET_MASK: u32 = 0xffff;
const EXTENDED_BUFFER_CTL_SIZE_SHIFT: u32 = 16;
const EXTENDED_BUFFER_CTL_SIZE_MASK: u32 = 0xff;

const PPC_INFO_NUM_PPCS_MASK: u32 = 0xffff;
const PPC_INFO_PPC_MASK_SHIFT: u32 = 16;
const PPC_INFO_PPC_MASK_MASK: u32 = 0xffff;

const PRIV_REGISTER_CTL_OFFSET_MASK: u32 = 0xffff;

/// Decoded main header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainHeader {
    /// GPCs saved in this image
    pub num_gpcs: u32,
    /// Extended buffer offset, in 256 byte units
    pub ext_offset: u32,
    /// Extended buffer size, in extended segments
    pub ext_size: u32,
}

/// Decoded FECS or GPCCS local header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalHeader {
    /// Start of this unit's register segment, in 256 byte units
    pub priv_segment: u32,
    /// TPCs saved for this GPC
    pub num_tpcs: u32,
    /// PPCs saved for this GPC
    pub num_ppcs: u32,
    /// Populated PPCs
    pub ppc_mask: u32,
}

// =============================================================================
// READER
// =============================================================================

/// Bounds-checked view of a saved context image
#[derive(Debug, Clone, Copy)]
pub struct CtxImage<'a> {
    bytes: &'a [u8],
    layout: &'a CtxswProgLayout,
}

impl<'a> CtxImage<'a> {
    /// Wrap raw image bytes
    pub fn new(bytes: &'a [u8], layout: &'a CtxswProgLayout) -> Self {
        Self { bytes, layout }
    }

    /// Image size in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Header layout used to read the image
    #[inline]
    pub fn layout(&self) -> &'a CtxswProgLayout {
        self.layout
    }

    /// Read the little-endian word at byte `offset`
    pub fn read_u32(&self, offset: u32) -> Result<u32> {
        let start = offset as usize;
        let word = start
            .checked_add(4)
            .and_then(|end| self.bytes.get(start..end))
            .ok_or_else(|| {
                log::error!(
                    "ctx image: read at 0x{:x} past end of {} byte image",
                    offset,
                    self.bytes.len()
                );
                Error::NotFound
            })?;
        Ok(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
    }

    fn check_magic(&self, header: u32, expected: u32, what: &str) -> Result<()> {
        let magic = self.read_u32(header + self.layout.magic_offset)?;
        if magic != expected {
            log::error!(
                "ctx image: invalid {} header magic 0x{:08x} at 0x{:x}",
                what,
                magic,
                header
            );
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Validate and decode the main header
    pub fn main_header(&self) -> Result<MainHeader> {
        self.check_magic(0, self.layout.main_image_magic, "main")?;
        let ext_ctl = self.read_u32(self.layout.main_extended_buffer_ctl_offset)?;
        Ok(MainHeader {
            num_gpcs: self.read_u32(self.layout.main_num_gpcs_offset)?,
            ext_offset: ext_ctl & EXTENDED_BUFFER_CTL_OFFSET_MASK,
            ext_size: (ext_ctl >> EXTENDED_BUFFER_CTL_SIZE_SHIFT) & EXTENDED_BUFFER_CTL_SIZE_MASK,
        })
    }

    fn local_header(&self, base: u32, what: &str) -> Result<LocalHeader> {
        self.check_magic(base, self.layout.local_image_magic, what)?;
        let ppc_info = self.read_u32(base + self.layout.local_ppc_info_offset)?;
        Ok(LocalHeader {
            priv_segment: self.read_u32(base + self.layout.local_priv_register_ctl_offset)?
                & PRIV_REGISTER_CTL_OFFSET_MASK,
            num_tpcs: self.read_u32(base + self.layout.local_num_tpcs_offset)?,
            num_ppcs: ppc_info & PPC_INFO_NUM_PPCS_MASK,
            ppc_mask: (ppc_info >> PPC_INFO_PPC_MASK_SHIFT) & PPC_INFO_PPC_MASK_MASK,
        })
    }

    /// Validate and decode the FECS local header
    pub fn fecs_header(&self) -> Result<LocalHeader> {
        self.local_header(self.layout.fecs_header_size, "FECS local")
    }

    /// Validate and decode the local header of GPC `gpc`
    ///
    /// Unit counts above what `litter` allows per GPC make the header
    /// invalid.
    pub fn gpccs_header(&self, gpc: u32, litter: &Litter) -> Result<LocalHeader> {
        let base = gpc
            .checked_add(1)
            .and_then(|n| n.checked_mul(self.layout.gpccs_header_size))
            .and_then(|off| off.checked_add(self.layout.fecs_header_size))
            .ok_or(Error::NotFound)?;
        let header = self.local_header(base, "GPCCS local")?;

        if header.num_tpcs > litter.num_tpc_per_gpc || header.num_ppcs > litter.num_pes_per_gpc {
            log::error!(
                "ctx image: GPC {} header claims {} TPCs {} PPCs, at most {} and {}",
                gpc,
                header.num_tpcs,
                header.num_ppcs,
                litter.num_tpc_per_gpc,
                litter.num_pes_per_gpc
            );
            return Err(Error::NotFound);
        }
        Ok(header)
    }
}
