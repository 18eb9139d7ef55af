//! Page-Table Walker (§4.3).
//!
//! Grounded on the host simulator's `mmu.rs::translate` for the overall
//! level-iteration shape (walk from a root PPN, per-level PTE validity and
//! leaf checks, A/D update-and-writeback, superpage alignment check) and on
//! the reference walker's `tlbLookupSv39`/`tlbLookupSv48`/their `x4`
//! counterparts and `readPageTableEntry`/`writePageTableEntry`/
//! `handlePTWException` for the ×4 guest-offset handling, the PTW-domain
//! indirection, and the artifact-suppresses-writeback rule.

use crate::domain::{Domain, Endian, Perm};
use crate::error::{AccessType, Trap};
use crate::tlb::AccessKind;

/// Which page-table format is in effect for one walk (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationMode {
    Bare,
    Sv32,
    Sv39,
    Sv48,
}

struct ModeShape {
    levels: u32,
    vpn_bits: u32,
    pte_size: u8,
}

impl TranslationMode {
    fn shape(self) -> ModeShape {
        match self {
            TranslationMode::Bare => unreachable!("Bare has no page-table shape"),
            TranslationMode::Sv32 => ModeShape {
                levels: 2,
                vpn_bits: 10,
                pte_size: 4,
            },
            TranslationMode::Sv39 => ModeShape {
                levels: 3,
                vpn_bits: 9,
                pte_size: 8,
            },
            TranslationMode::Sv48 => ModeShape {
                levels: 4,
                vpn_bits: 9,
                pte_size: 8,
            },
        }
    }

    /// Highest VA bit actually used to index the page tables, i.e. the bit
    /// above which Sv39/Sv48 require sign-extension (§4.3 step 1). Sv32
    /// addresses the full 32-bit space and needs no such check.
    fn va_top_bit(self) -> Option<u32> {
        match self {
            TranslationMode::Sv39 => Some(38),
            TranslationMode::Sv48 => Some(47),
            _ => None,
        }
    }
}

const PTE_V: u64 = 1 << 0;
const PTE_R: u64 = 1 << 1;
const PTE_W: u64 = 1 << 2;
const PTE_X: u64 = 1 << 3;
const PTE_U: u64 = 1 << 4;
const PTE_G: u64 = 1 << 5;
const PTE_A: u64 = 1 << 6;
const PTE_D: u64 = 1 << 7;

const PAGE_SIZE: u64 = 4096;

/// A completed, not-yet-installed translation (§3, minus the fields that
/// only make sense once the entry is in a particular TLB — `tlb_id`,
/// `mapped`, `sim_asid`/`asid_mask` are filled in by
/// [`crate::orchestrator`]).
#[derive(Debug, Clone, Copy)]
pub struct WalkResult {
    pub low_va: u64,
    pub high_va: u64,
    pub low_pa: u64,
    pub priv_mask: Perm,
    pub u_bit: bool,
    pub g_bit: bool,
    pub a_bit: bool,
    pub d_bit: bool,
}

/// Inputs to one page-table walk.
pub struct WalkParams {
    pub mode: TranslationMode,
    /// Root page table PPN (`satp`/`vsatp`/`hgatp` PPN field).
    pub root_ppn: u64,
    pub va: u64,
    pub access: AccessType,
    pub endian: Endian,
    pub hardware_ad: bool,
    pub kind: AccessKind,
    /// 2-bit guest-offset for an Sv*x4 hypervisor second-stage walk (§4.3
    /// step 2); zero for a non-×4 walk.
    pub guest_offset: u64,
    /// True when `va` is a guest-physical address being walked as a VS2 (or
    /// composed stage-2) translation rather than an ordinary signed VA.
    /// Stage-2 addresses are physical and must not be sign-extension-checked
    /// the way a base-mode VA is (§4.3 step 1 applies only to stage-1/HS
    /// walks).
    pub stage2: bool,
}

/// Walk the page tables described by `params`, reading/writing PTEs through
/// `ptw_domain` (the M-mode PMP-checked PTW path, §4.3 final paragraph).
pub fn walk(params: &WalkParams, ptw_domain: &mut dyn Domain) -> Result<WalkResult, Trap> {
    debug_assert_ne!(params.mode, TranslationMode::Bare);
    let shape = params.mode.shape();

    if !params.stage2 {
        if let Some(top) = params.mode.va_top_bit() {
            let sign = (params.va >> top) & 1;
            let expected = if sign == 1 { !0u64 } else { 0u64 };
            if (params.va >> (top + 1)) != (expected >> (top + 1)) {
                log::warn!("VAEXTEND: va {:#x} is not a valid sign extension", params.va);
                return Err(Trap::page_fault(params.access, params.va, false));
            }
        }
    }

    let mut table_base = (params.root_ppn * PAGE_SIZE) + params.guest_offset * PAGE_SIZE;
    let mut level = shape.levels - 1;

    loop {
        let vpn = (params.va >> (12 + level * shape.vpn_bits)) & ((1u64 << shape.vpn_bits) - 1);
        let pte_addr = table_base + vpn * shape.pte_size as u64;

        let raw = ptw_domain
            .read(pte_addr, shape.pte_size, params.endian)
            .map_err(|_| Trap::access_fault(params.access, params.va))?;

        if raw & PTE_V == 0 {
            log_pte_condition(params.kind, &format!("V=0 page fault at level {level}"));
            return Err(Trap::page_fault(params.access, params.va, false));
        }
        if raw & PTE_R == 0 && raw & PTE_W != 0 {
            log::warn!("R0W1: reserved PTE encoding at {:#x}", pte_addr);
            return Err(Trap::page_fault(params.access, params.va, false));
        }

        let is_leaf = raw & (PTE_R | PTE_W | PTE_X) != 0;
        if !is_leaf {
            if level == 0 {
                log_pte_condition(params.kind, "no leaf found at deepest level");
                return Err(Trap::page_fault(params.access, params.va, false));
            }
            let ppn = raw >> 10;
            table_base = ppn * PAGE_SIZE;
            level -= 1;
            continue;
        }

        let page_size = PAGE_SIZE << (level * shape.vpn_bits);
        let ppn = raw >> 10;
        let pa_base = ppn * PAGE_SIZE;
        if level > 0 && pa_base & (page_size - 1) != 0 {
            log::warn!("misaligned superpage PPN at {:#x}", pte_addr);
            return Err(Trap::page_fault(params.access, params.va, false));
        }

        // The full permission check (§4.4: MXR/SUM/mode) is applied uniformly
        // by the orchestrator for both TLB hits and fresh walks, so the
        // walker only decodes the raw R/W/X bits here.
        let priv_mask = decode_priv(raw);

        let (mut new_raw, mut a_set, mut d_set) = (raw, raw & PTE_A != 0, raw & PTE_D != 0);
        if raw & PTE_A == 0 {
            if !params.hardware_ad {
                log_pte_condition(params.kind, "A=0 and hardware A-update disabled");
                return Err(Trap::page_fault(params.access, params.va, false));
            }
            new_raw |= PTE_A;
            a_set = true;
        }
        if params.access == AccessType::Store && raw & PTE_D == 0 {
            if !params.hardware_ad {
                log_pte_condition(params.kind, "D=0 and hardware A-update disabled");
                return Err(Trap::page_fault(params.access, params.va, false));
            }
            new_raw |= PTE_D;
            d_set = true;
        }

        if new_raw != raw && !matches!(params.kind, AccessKind::Artifact) {
            ptw_domain
                .write(pte_addr, shape.pte_size, params.endian, new_raw)
                .map_err(|_| Trap::access_fault(params.access, params.va))?;
        }

        let va_mask = page_size - 1;
        let low_va = params.va & !va_mask;
        let low_pa = pa_base;

        return Ok(WalkResult {
            low_va,
            high_va: low_va + va_mask,
            low_pa,
            priv_mask,
            u_bit: raw & PTE_U != 0,
            g_bit: raw & PTE_G != 0,
            a_bit: a_set,
            d_bit: d_set,
        });
    }
}

fn decode_priv(raw: u64) -> Perm {
    let mut p = Perm::NONE;
    if raw & PTE_R != 0 {
        p = p.union(Perm::R);
    }
    if raw & PTE_W != 0 {
        p = p.union(Perm::W);
    }
    if raw & PTE_X != 0 {
        p = p.union(Perm::X);
    }
    p
}

fn log_pte_condition(kind: AccessKind, msg: &str) {
    if matches!(kind, AccessKind::Real) {
        log::debug!("{msg}");
    } else if log::log_enabled!(log::Level::Trace) {
        log::trace!("(artifact) {msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TestDomain;

    #[test]
    fn sv39_single_level_leaf_translates() {
        let mut dom = TestDomain::new();
        // Root table at PPN 0x80000 (PA 0x8000_0000); VPN2 index for VA
        // 0xC000_1000 is (0xC0001000 >> 30) & 0x1FF = 3.
        let pte_addr = 0x8000_0000u64 + 3 * 8;
        let ppn = 0x4_0000u64;
        let raw = PTE_V | PTE_R | PTE_W | PTE_U | PTE_A | PTE_D | (ppn << 10);
        dom.seed(pte_addr, raw);

        let params = WalkParams {
            mode: TranslationMode::Sv39,
            root_ppn: 0x80000,
            va: 0xC000_1000,
            access: AccessType::Load,
            endian: Endian::Little,
            hardware_ad: true,
            kind: AccessKind::Real,
            guest_offset: 0,
            stage2: false,
        };
        let result = walk(&params, &mut dom).unwrap();
        assert_eq!(result.low_pa, 0x1_0000_0000);
        assert!(result.priv_mask.contains(Perm::R));
    }

    #[test]
    fn sv39_va_extend_violation_page_faults() {
        let mut dom = TestDomain::new();
        let params = WalkParams {
            mode: TranslationMode::Sv39,
            root_ppn: 0x80000,
            va: 0x0000_0040_0000_0000,
            access: AccessType::Load,
            endian: Endian::Little,
            hardware_ad: true,
            kind: AccessKind::Real,
            guest_offset: 0,
            stage2: false,
        };
        assert!(walk(&params, &mut dom).is_err());
    }

    #[test]
    fn reserved_r0w1_encoding_page_faults() {
        let mut dom = TestDomain::new();
        let pte_addr = 0x8000_0000u64 + 3 * 8;
        dom.seed(pte_addr, PTE_V | PTE_W);
        let params = WalkParams {
            mode: TranslationMode::Sv39,
            root_ppn: 0x80000,
            va: 0xC000_1000,
            access: AccessType::Load,
            endian: Endian::Little,
            hardware_ad: true,
            kind: AccessKind::Real,
            guest_offset: 0,
            stage2: false,
        };
        assert!(walk(&params, &mut dom).is_err());
    }

    #[test]
    fn ad_bits_set_and_written_back_on_store() {
        let mut dom = TestDomain::new();
        let pte_addr = 0x8000_0000u64 + 3 * 8;
        let ppn = 0x4_0000u64;
        let raw = PTE_V | PTE_R | PTE_W | PTE_U | (ppn << 10);
        dom.seed(pte_addr, raw);

        let params = WalkParams {
            mode: TranslationMode::Sv39,
            root_ppn: 0x80000,
            va: 0xC000_1000,
            access: AccessType::Store,
            endian: Endian::Little,
            hardware_ad: true,
            kind: AccessKind::Real,
            guest_offset: 0,
            stage2: false,
        };
        let result = walk(&params, &mut dom).unwrap();
        assert!(result.a_bit && result.d_bit);
        let written = dom.read(pte_addr, 8, Endian::Little).unwrap();
        assert_ne!(written & PTE_A, 0);
        assert_ne!(written & PTE_D, 0);
    }

    #[test]
    fn artifact_walk_suppresses_pte_writeback() {
        let mut dom = TestDomain::new();
        let pte_addr = 0x8000_0000u64 + 3 * 8;
        let ppn = 0x4_0000u64;
        let raw = PTE_V | PTE_R | PTE_W | PTE_U | (ppn << 10);
        dom.seed(pte_addr, raw);

        let params = WalkParams {
            mode: TranslationMode::Sv39,
            root_ppn: 0x80000,
            va: 0xC000_1000,
            access: AccessType::Store,
            endian: Endian::Little,
            hardware_ad: true,
            kind: AccessKind::Artifact,
            guest_offset: 0,
            stage2: false,
        };
        walk(&params, &mut dom).unwrap();
        let unchanged = dom.read(pte_addr, 8, Endian::Little).unwrap();
        assert_eq!(unchanged, raw);
    }
}
