//! Composite "simulated ASID" tag (§3).
//!
//! The reference hart core packs this into a C union of bitfields over a
//! `Uns64`. Per the design notes (§9) this is reimplemented as a plain
//! newtype over `u64` with explicit `get_*`/`with_*` accessors rather than a
//! transmute-based bitfield view — the bit layout is an internal
//! implementation detail (§6 says implementations may choose any encoding),
//! so there is no wire format to preserve here beyond round-tripping through
//! [`crate::snapshot`].

use crate::csr::HostProcessor;
use crate::tlb::TlbId;

const ASID_HS_SHIFT: u32 = 0;
const ASID_VS_SHIFT: u32 = 16;
const VMID_SHIFT: u32 = 32;
const MXR_HS_BIT: u32 = 48;
const SUM_HS_BIT: u32 = 49;
const MXR_VS_BIT: u32 = 50;
const SUM_VS_BIT: u32 = 51;
const S1_BIT: u32 = 52;
const S2_BIT: u32 = 53;

const ASID_MASK: u64 = 0xFFFF;
const VMID_MASK: u64 = 0xFFFF;

/// Composite simulated ASID: HS/VS ASIDs, VMID, and the status bits that
/// affect whether a cached translation remains valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct SimAsid(pub u64);

impl SimAsid {
    pub fn asid_hs(self) -> u16 {
        ((self.0 >> ASID_HS_SHIFT) & ASID_MASK) as u16
    }
    pub fn asid_vs(self) -> u16 {
        ((self.0 >> ASID_VS_SHIFT) & ASID_MASK) as u16
    }
    pub fn vmid(self) -> u16 {
        ((self.0 >> VMID_SHIFT) & VMID_MASK) as u16
    }
    pub fn mxr_hs(self) -> bool {
        self.0 & (1 << MXR_HS_BIT) != 0
    }
    pub fn sum_hs(self) -> bool {
        self.0 & (1 << SUM_HS_BIT) != 0
    }
    pub fn mxr_vs(self) -> bool {
        self.0 & (1 << MXR_VS_BIT) != 0
    }
    pub fn sum_vs(self) -> bool {
        self.0 & (1 << SUM_VS_BIT) != 0
    }
    pub fn s1(self) -> bool {
        self.0 & (1 << S1_BIT) != 0
    }
    pub fn s2(self) -> bool {
        self.0 & (1 << S2_BIT) != 0
    }

    fn set_bit(self, bit: u32, v: bool) -> SimAsid {
        if v {
            SimAsid(self.0 | (1 << bit))
        } else {
            SimAsid(self.0 & !(1 << bit))
        }
    }

    /// Build the composite ASID that is currently in force, reading the
    /// relevant CSR/status fields off the host (mirrors `getSimASID`).
    pub fn current(host: &dyn HostProcessor) -> SimAsid {
        let satp = crate::csr::decode_satp(host.satp());
        let vsatp = crate::csr::decode_satp(host.vsatp());
        let hgatp = crate::csr::decode_hgatp(host.hgatp());

        let mut v = 0u64;
        v |= (satp.asid_or_vmid & ASID_MASK) << ASID_HS_SHIFT;
        v |= (vsatp.asid_or_vmid & ASID_MASK) << ASID_VS_SHIFT;
        v |= (hgatp.asid_or_vmid & VMID_MASK) << VMID_SHIFT;

        let mut asid = SimAsid(v);
        asid = asid.set_bit(MXR_HS_BIT, host.mstatus_mxr());
        asid = asid.set_bit(SUM_HS_BIT, host.mstatus_sum());
        asid = asid.set_bit(MXR_VS_BIT, host.vsstatus_mxr());
        asid = asid.set_bit(SUM_VS_BIT, host.vsstatus_sum());
        asid = asid.set_bit(S1_BIT, vsatp.mode != 0);
        asid = asid.set_bit(S2_BIT, hgatp.mode != 0);
        asid
    }

    /// Mask ASID down to the implemented width, matching the host's XLEN
    /// encoding of `satp.ASID` first and then the configured implemented
    /// width (`maskASID`).
    pub fn mask_asid_to_width(asid: u32, asid_bits: u32) -> u32 {
        if asid_bits == 0 {
            return 0;
        }
        let width_mask = (1u64 << asid_bits.min(63)) - 1;
        (asid as u64 & width_mask) as u32
    }
}

/// Which bits of [`SimAsid`] are relevant for a particular TLB entry (§3,
/// §4.2 "ASID masking rule"). Equality of two `SimAsid` values is only
/// meaningful after ANDing with a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct SimAsidMask(pub u64);

impl SimAsidMask {
    /// Compute the ASID mask for an entry given its TLB identity, whether it
    /// is global, whether it is user-accessible, whether it was installed
    /// while in Supervisor mode, and whether it was created under
    /// virtualization (`getEntryASIDMask`).
    pub fn for_entry(
        tlb_id: TlbId,
        global: bool,
        user_accessible: bool,
        installed_in_supervisor: bool,
        created_virtual: bool,
    ) -> SimAsidMask {
        // MXR_HS is always relevant.
        let mut m = 1u64 << MXR_HS_BIT;

        if !global {
            match tlb_id {
                TlbId::Hs => m |= ASID_MASK << ASID_HS_SHIFT,
                TlbId::Vs1 => m |= ASID_MASK << ASID_VS_SHIFT,
                TlbId::Vs2 => {}
            }
        }

        // Stage-2 entries are always treated as user mode, so SUM never
        // applies to them.
        if tlb_id != TlbId::Vs2 && user_accessible && installed_in_supervisor {
            if created_virtual {
                m |= 1 << SUM_VS_BIT;
            } else {
                m |= 1 << SUM_HS_BIT;
            }
        }

        if created_virtual {
            m |= VMID_MASK << VMID_SHIFT;
            m |= 1 << MXR_VS_BIT;
            m |= 1 << S1_BIT;
            m |= 1 << S2_BIT;
        }

        SimAsidMask(m)
    }

    /// OR-combine two masks — used when folding a stage-2 entry's mask into
    /// a composed stage-1+2 alias (§4.1 "Two-stage composition").
    pub fn combine(self, other: SimAsidMask) -> SimAsidMask {
        SimAsidMask(self.0 | other.0)
    }

    pub fn apply(self, asid: SimAsid) -> u64 {
        asid.0 & self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_entry_ignores_asid_bits() {
        let mask = SimAsidMask::for_entry(TlbId::Hs, true, false, false, false);
        assert_eq!(mask.0 & (ASID_MASK << ASID_HS_SHIFT), 0);
        assert_ne!(mask.0 & (1 << MXR_HS_BIT), 0);
    }

    #[test]
    fn stage2_entry_ignores_sum() {
        let mask = SimAsidMask::for_entry(TlbId::Vs2, false, true, true, true);
        assert_eq!(mask.0 & (1 << SUM_HS_BIT), 0);
        assert_eq!(mask.0 & (1 << SUM_VS_BIT), 0);
    }

    #[test]
    fn virtual_entry_includes_vmid_and_stage_flags() {
        let mask = SimAsidMask::for_entry(TlbId::Vs1, false, false, false, true);
        assert_ne!(mask.0 & (VMID_MASK << VMID_SHIFT), 0);
        assert_ne!(mask.0 & (1 << S1_BIT), 0);
        assert_ne!(mask.0 & (1 << S2_BIT), 0);
    }

    #[test]
    fn combine_ors_bits() {
        let a = SimAsidMask(0b0011);
        let b = SimAsidMask(0b1100);
        assert_eq!(a.combine(b).0, 0b1111);
    }

    #[test]
    fn mask_asid_to_width_zero_bits_is_global() {
        assert_eq!(SimAsid::mask_asid_to_width(7, 0), 0);
        assert_eq!(SimAsid::mask_asid_to_width(0xFF, 8), 0xFF);
        assert_eq!(SimAsid::mask_asid_to_width(0x1FF, 8), 0xFF);
    }
}
