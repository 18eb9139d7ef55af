//! PMP Region Matcher (§4.5).
//!
//! The host simulator this crate was grounded on has no PMP implementation
//! of its own (RISC-V's M-mode-only physical memory protection), so this
//! module is grounded directly on the reference walker's PMP section
//! (`getEffectivePMPAddr`, `getPMPRegionActive`, `pmpLockedTOR`,
//! `getPMPEntryBounds`, `refinePMPRegionRange`, `mapPMP`,
//! `riscvVMRead/WritePMPCfg`, `riscvVMRead/WritePMPAddr`) while keeping this
//! crate's own conventions (`Perm`, `DomainError`, the style established in
//! [`crate::tlb`] and [`crate::domain`]).

use crate::domain::Perm;
use crate::error::DomainError;
use crate::mode::BaseMode;

/// Bits 3:4 of a pmpcfg byte — region address-matching mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmpMode {
    Off,
    Tor,
    Na4,
    Napot,
}

impl PmpMode {
    fn from_bits(b: u8) -> PmpMode {
        match b & 0b11 {
            0 => PmpMode::Off,
            1 => PmpMode::Tor,
            2 => PmpMode::Na4,
            _ => PmpMode::Napot,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            PmpMode::Off => 0,
            PmpMode::Tor => 1,
            PmpMode::Na4 => 2,
            PmpMode::Napot => 3,
        }
    }
}

/// External physical address width this crate assumes for address-register
/// masking (`riscvVMWritePMPAddr`'s mask to the implemented PA width).
const EXTERNAL_ADDR_BITS: u32 = 54;

#[derive(Debug, Clone, Copy)]
struct PmpEntry {
    priv_mask: Perm,
    mode: PmpMode,
    locked: bool,
    /// Raw `pmpaddr[i]` register value (already in its right-shifted-by-2
    /// architectural form).
    addr: u64,
}

impl PmpEntry {
    fn reset() -> PmpEntry {
        PmpEntry {
            priv_mask: Perm::NONE,
            mode: PmpMode::Off,
            locked: false,
            addr: 0,
        }
    }

    fn cfg_byte(self) -> u8 {
        let mut b = self.priv_mask.0 & 0b111;
        b |= self.mode.to_bits() << 3;
        if self.locked {
            b |= 1 << 7;
        }
        b
    }
}

/// Per-hart PMP region set.
#[derive(Debug)]
pub struct PmpUnit {
    entries: Vec<PmpEntry>,
    grain: u32,
}

impl PmpUnit {
    pub fn new(num_regions: u32, grain: u32) -> PmpUnit {
        PmpUnit {
            entries: vec![PmpEntry::reset(); num_regions as usize],
            grain,
        }
    }

    pub fn num_regions(&self) -> usize {
        self.entries.len()
    }

    /// `pmp_reset()` — clears every region to inactive and unlocked
    /// (`riscvVMResetPMP`).
    pub fn reset_all(&mut self) {
        for e in self.entries.iter_mut() {
            *e = PmpEntry::reset();
        }
    }

    fn addr_write_mask(&self) -> u64 {
        let width_mask = (1u64 << EXTERNAL_ADDR_BITS) - 1;
        if self.grain >= 1 {
            width_mask & !((1u64 << (self.grain - 1)) - 1)
        } else {
            width_mask
        }
    }

    /// `pmp_read_cfg(i)`.
    pub fn read_cfg(&self, i: usize) -> u8 {
        self.entries[i].cfg_byte()
    }

    /// `pmp_write_cfg(i, v)` — refuses if the entry is already locked
    /// (`validPMPCFG` + the locked-entry early return in
    /// `riscvVMWritePMPCfg`), and silently folds a requested NA4 mode back
    /// to the entry's previous mode when the grain forbids 4-byte regions.
    pub fn write_cfg(&mut self, i: usize, raw: u8) {
        if self.entries[i].locked {
            return;
        }
        let mut mode = PmpMode::from_bits((raw >> 3) & 0b11);
        if mode == PmpMode::Na4 && self.grain >= 1 {
            mode = self.entries[i].mode;
        }
        self.entries[i].priv_mask = Perm(raw & 0b111);
        self.entries[i].mode = mode;
        self.entries[i].locked = raw & (1 << 7) != 0;
    }

    /// `pmp_read_addr(i)` — applies the grain's read-masking rule: for
    /// NAPOT regions with `G>=2`, the low `G-1` bits read as one; for
    /// OFF/TOR the low `G` bits read as zero (`getEffectivePMPAddr`).
    pub fn read_addr(&self, i: usize) -> u64 {
        let e = self.entries[i];
        match e.mode {
            PmpMode::Napot if self.grain >= 2 => e.addr | ((1u64 << (self.grain - 1)) - 1),
            PmpMode::Off | PmpMode::Tor if self.grain >= 1 => e.addr & !((1u64 << self.grain) - 1),
            _ => e.addr,
        }
    }

    /// `pmp_write_addr(i, v)` — refuses if this entry is locked, or if the
    /// next-higher entry is a locked TOR region (`pmpLockedTOR`), since that
    /// entry's low bound depends on this one.
    pub fn write_addr(&mut self, i: usize, v: u64) {
        if self.entries[i].locked {
            return;
        }
        if let Some(next) = self.entries.get(i + 1) {
            if next.locked && next.mode == PmpMode::Tor {
                return;
            }
        }
        self.entries[i].addr = v & self.addr_write_mask();
    }

    /// Inclusive `[lo, hi]` bounds for region `i`, or `None` when the region
    /// is `OFF` (`getPMPEntryBounds`). Visible to [`crate::orchestrator`] so
    /// a cfg/addr write can un-protect the region's old and new bounds at
    /// the domain layer (§4.5).
    pub(crate) fn bounds(&self, i: usize) -> Option<(u64, u64)> {
        let e = self.entries[i];
        match e.mode {
            PmpMode::Off => None,
            PmpMode::Tor => {
                let lo = if i == 0 { 0 } else { self.entries[i - 1].addr << 2 };
                let hi = (e.addr << 2).wrapping_sub(1);
                Some((lo, hi))
            }
            PmpMode::Na4 => {
                let lo = e.addr << 2;
                Some((lo, lo + 3))
            }
            PmpMode::Napot => {
                let trailing_ones = (!e.addr).trailing_zeros().min(63);
                let size = 1u64 << (trailing_ones + 3);
                let lo = (e.addr & !((1u64 << trailing_ones) - 1)) << 2;
                Some((lo, lo + size - 1))
            }
        }
    }

    /// `map_pmp(mode, required_priv, lowPA, highPA)` — searches regions in
    /// increasing index order for the first whose bounds subsume the access
    /// footprint (§4.5: "the implementation scans high-to-low... the
    /// invariant is equivalent" — this crate scans low-to-high directly
    /// since there is no running-tuple state to fold writes into here).
    ///
    /// With zero implemented regions, PMP imposes no restriction at all. With
    /// at least one region implemented and no match, Machine mode retains
    /// full access and any other mode is denied.
    pub fn map_pmp(
        &self,
        mode: BaseMode,
        required_priv: Perm,
        lo_pa: u64,
        hi_pa: u64,
    ) -> Result<Perm, DomainError> {
        if self.entries.is_empty() {
            return Ok(Perm::RWX);
        }

        for i in 0..self.entries.len() {
            let Some((lo, hi)) = self.bounds(i) else {
                continue;
            };
            if lo <= lo_pa && hi_pa <= hi {
                let e = self.entries[i];
                let granted = if mode == BaseMode::Machine && !e.locked {
                    Perm::RWX
                } else {
                    e.priv_mask
                };
                return if granted.contains(required_priv) {
                    Ok(granted)
                } else {
                    Err(DomainError::PmpSplit)
                };
            }
        }

        if mode == BaseMode::Machine {
            Ok(Perm::RWX)
        } else {
            Err(DomainError::PmpSplit)
        }
    }
}
