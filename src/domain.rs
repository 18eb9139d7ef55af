//! Memory Domain Abstraction (§2 item 1).
//!
//! The host simulator owns raw byte-addressable memory; this crate only
//! creates named, permission-tagged *domains* over it and installs/removes
//! virtual→physical aliases. Grounded on the `Bus` trait in the host
//! simulator's `bus.rs` (the `load`/`store` helpers used by the page-table
//! walker) generalized into the richer domain interface the reference
//! walker's `vmirt*Domain`/`vmirtAliasMemoryVM` calls describe — creating
//! domains, aliasing ranges tagged by ASID mask, and protecting regions with
//! R/W/X masks.

use crate::error::DomainError;

/// Read/write/execute permission mask, packed the way the host simulator's
/// MMU packs permission bits (`PERM_R`/`PERM_W`/`PERM_X` in `mmu.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Perm(pub u8);

impl Perm {
    pub const NONE: Perm = Perm(0);
    pub const R: Perm = Perm(1 << 0);
    pub const W: Perm = Perm(1 << 1);
    pub const X: Perm = Perm(1 << 2);
    pub const RW: Perm = Perm(Self::R.0 | Self::W.0);
    pub const RWX: Perm = Perm(Self::R.0 | Self::W.0 | Self::X.0);

    pub fn contains(self, other: Perm) -> bool {
        (self.0 & other.0) == other.0
    }
    pub fn union(self, other: Perm) -> Perm {
        Perm(self.0 | other.0)
    }
    pub fn intersect(self, other: Perm) -> Perm {
        Perm(self.0 & other.0)
    }
}

/// Byte-addressable memory endianness for a PTE read/write (§4.3: "read
/// PTEs in the memory endianness corresponding to the translation's
/// privilege side").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// A memory domain as the translation core sees it: something it can read
/// and write fixed-size words from/to, and onto which it can install
/// permission-tagged virtual aliases.
///
/// Implemented by the host simulator. This crate ships [`TestDomain`], a
/// minimal in-memory implementation used by its own unit tests.
pub trait Domain: Send {
    /// Read `size` bytes (4 or 8) at physical address `pa` with `endian`.
    fn read(&self, pa: u64, size: u8, endian: Endian) -> Result<u64, DomainError>;

    /// Write `size` bytes (4 or 8) at physical address `pa` with `endian`.
    fn write(&mut self, pa: u64, size: u8, endian: Endian, value: u64) -> Result<(), DomainError>;

    /// Install a virtual→physical alias `[lo_va, hi_va] -> [lo_pa, ..]` with
    /// the given permission, tagged with `(asid_mask, asid)` so that a
    /// future composite-ASID change that flips any masked bit invalidates
    /// the alias without this crate's involvement (`vmirtAliasMemoryVM`).
    fn install_alias(
        &mut self,
        lo_va: u64,
        hi_va: u64,
        lo_pa: u64,
        priv_mask: Perm,
        asid_mask: u64,
        asid: u64,
    );

    /// Remove a previously installed alias over `[lo_va, hi_va]` tagged with
    /// `(asid_mask, asid)` (`vmirtUnaliasMemoryVM`).
    fn remove_alias(&mut self, lo_va: u64, hi_va: u64, asid_mask: u64, asid: u64);

    /// Set (not merge) the permission mask over a physical range, used by
    /// the PMP matcher to refresh protection (`vmirtProtectMemory`).
    fn protect(&mut self, lo_pa: u64, hi_pa: u64, priv_mask: Perm);
}

/// Which logical memory domain a handle refers to, for classification in
/// [`crate::orchestrator`] (`getDomainType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainKind {
    /// Raw physical memory, bypassing translation (used directly when no
    /// virtual-memory mode is active).
    Physical,
    /// Virtually-mapped: the orchestrator walks page tables and installs
    /// aliases into this domain on miss.
    Virtual,
    /// PMP-gated view of physical memory that the walker itself reads
    /// page-table entries through (page-table walks are PMP-checked).
    Pmp,
}

/// Opaque handle to one of the domains created by [`crate::vm_init`],
/// comparable the way the reference walker compares `memDomainP` pointers in
/// `getDomainType`. Serializable because [`crate::tlb::TlbEntry`] records
/// which domains it has live aliases in, and that set is part of the
/// snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DomainHandle(pub(crate) usize);

/// A minimal, dependency-free in-memory [`Domain`] used by this crate's own
/// tests — not intended for production use by a host simulator, which will
/// typically back a domain with shared guest DRAM.
#[derive(Default)]
pub struct TestDomain {
    words: std::collections::HashMap<u64, u64>,
}

impl TestDomain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a page-table entry (or any other word) at `pa`.
    pub fn seed(&mut self, pa: u64, value: u64) {
        self.words.insert(pa, value);
    }
}

impl Domain for TestDomain {
    fn read(&self, pa: u64, _size: u8, _endian: Endian) -> Result<u64, DomainError> {
        self.words
            .get(&pa)
            .copied()
            .ok_or(DomainError::OutOfBounds(pa))
    }

    fn write(&mut self, pa: u64, _size: u8, _endian: Endian, value: u64) -> Result<(), DomainError> {
        self.words.insert(pa, value);
        Ok(())
    }

    fn install_alias(
        &mut self,
        _lo_va: u64,
        _hi_va: u64,
        _lo_pa: u64,
        _priv_mask: Perm,
        _asid_mask: u64,
        _asid: u64,
    ) {
        // The reference test double doesn't model guest-visible aliasing;
        // the TLB itself is the authoritative cache for this crate's tests.
    }

    fn remove_alias(&mut self, _lo_va: u64, _hi_va: u64, _asid_mask: u64, _asid: u64) {}

    fn protect(&mut self, _lo_pa: u64, _hi_pa: u64, _priv_mask: Perm) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perm_contains() {
        assert!(Perm::RWX.contains(Perm::R));
        assert!(!Perm::R.contains(Perm::W));
    }

    #[test]
    fn test_domain_read_write_roundtrip() {
        let mut d = TestDomain::new();
        d.write(0x1000, 8, Endian::Little, 0xDEAD_BEEF).unwrap();
        assert_eq!(d.read(0x1000, 8, Endian::Little).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_domain_missing_read_is_out_of_bounds() {
        let d = TestDomain::new();
        assert!(matches!(
            d.read(0x2000, 8, Endian::Little),
            Err(DomainError::OutOfBounds(0x2000))
        ));
    }
}
