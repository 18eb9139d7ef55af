//! Invalidation Engine (§4.7).
//!
//! Thin policy layer over [`VmCore`]'s per-identity `Tlb`s: picks the
//! top-level identity from the host's virtualization state, masks a
//! supplied ASID to the implemented width (degrading to an unconditional
//! invalidation when ASIDs aren't implemented at all), and reads the
//! current VMID for the VMID-preservation rule. Grounded on the reference
//! walker's `riscvVMInvalidate*`/`maskASID`/`getS1TLBId`.

use crate::asid::SimAsid;
use crate::csr::HostProcessor;
use crate::orchestrator::VmCore;
use crate::tlb::TlbId;

/// Which identity a top-level (guest-facing) invalidation op applies to:
/// HS when not virtualized, VS1 when it is (`getS1TLBId`).
fn top_level_identity(host: &dyn HostProcessor) -> TlbId {
    if host.mode().is_virtual() {
        TlbId::Vs1
    } else {
        TlbId::Hs
    }
}

fn current_vmid(host: &dyn HostProcessor) -> u16 {
    crate::csr::decode_hgatp(host.hgatp()).asid_or_vmid as u16
}

/// `vm_invalidate_all` — unconditional flush of the active identity's TLB.
pub fn invalidate_all(core: &mut VmCore, host: &dyn HostProcessor) {
    core.invalidate_all(top_level_identity(host));
}

/// `vm_invalidate_all_asid` — flush entries tagged with `asid`, preserving
/// globals and VMID-mismatched entries; degrades to [`invalidate_all`] when
/// ASIDs are not implemented.
pub fn invalidate_all_asid(core: &mut VmCore, host: &dyn HostProcessor, asid: u32) {
    let id = top_level_identity(host);
    if core.config().asid_bits == 0 {
        core.invalidate_all(id);
        return;
    }
    let masked = SimAsid::mask_asid_to_width(asid, core.config().asid_bits) as u16;
    core.invalidate_all_asid(id, masked, current_vmid(host));
}

/// `vm_invalidate_va` — unconditional removal of any entry covering `va`.
pub fn invalidate_va(core: &mut VmCore, host: &dyn HostProcessor, va: u64) {
    core.invalidate_va(top_level_identity(host), va);
}

/// `vm_invalidate_va_asid` — as [`invalidate_va`] but additionally
/// qualified by ASID, with the same degrade-to-unconditional and
/// VMID-preservation rules as [`invalidate_all_asid`].
pub fn invalidate_va_asid(core: &mut VmCore, host: &dyn HostProcessor, va: u64, asid: u32) {
    let id = top_level_identity(host);
    if core.config().asid_bits == 0 {
        core.invalidate_va(id, va);
        return;
    }
    let masked = SimAsid::mask_asid_to_width(asid, core.config().asid_bits) as u16;
    core.invalidate_va_asid(id, va, masked, current_vmid(host));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::domain::{DomainKind, TestDomain};
    use crate::mode::{BaseMode, Mode};
    use crate::orchestrator::DomainCatalog;

    struct FakeHost {
        mode: Mode,
        satp: u64,
        hgatp: u64,
    }

    impl HostProcessor for FakeHost {
        fn mode(&self) -> Mode {
            self.mode
        }
        fn satp(&self) -> u64 {
            self.satp
        }
        fn vsatp(&self) -> u64 {
            0
        }
        fn hgatp(&self) -> u64 {
            self.hgatp
        }
        fn mstatus_mxr(&self) -> bool {
            false
        }
        fn mstatus_sum(&self) -> bool {
            false
        }
        fn mstatus_mprv(&self) -> bool {
            false
        }
        fn mstatus_mpp(&self) -> BaseMode {
            BaseMode::User
        }
        fn mstatush_mpv(&self) -> bool {
            false
        }
        fn vsstatus_mxr(&self) -> bool {
            false
        }
        fn vsstatus_sum(&self) -> bool {
            false
        }
        fn in_debug_mode(&self) -> bool {
            false
        }
        fn dcsr_mprven(&self) -> bool {
            false
        }
        fn raise_exception(&mut self, _trap: crate::error::Trap) {}
        fn notify_asid_changed(&mut self, _composite: u64) {}
        fn reselect_data_domain(&mut self, _mode: Mode) {}
    }

    fn fresh_core() -> VmCore {
        let mut catalog = DomainCatalog::new();
        catalog.register(Box::new(TestDomain::new()), DomainKind::Virtual);
        VmCore::new(CoreConfig::default(), catalog)
    }

    #[test]
    fn top_level_identity_follows_virtualization() {
        let host = FakeHost {
            mode: Mode::Supervisor,
            satp: 0,
            hgatp: 0,
        };
        assert_eq!(top_level_identity(&host), TlbId::Hs);
        let vhost = FakeHost {
            mode: Mode::VirtSupervisor,
            satp: 0,
            hgatp: 0,
        };
        assert_eq!(top_level_identity(&vhost), TlbId::Vs1);
    }

    #[test]
    fn invalidate_all_is_idempotent() {
        let mut core = fresh_core();
        let host = FakeHost {
            mode: Mode::Supervisor,
            satp: 0,
            hgatp: 0,
        };
        invalidate_all(&mut core, &host);
        invalidate_all(&mut core, &host);
    }

    #[test]
    fn zero_asid_bits_degrades_to_unconditional() {
        let mut catalog = DomainCatalog::new();
        catalog.register(Box::new(TestDomain::new()), DomainKind::Virtual);
        let mut config = CoreConfig::default();
        config.asid_bits = 0;
        let mut core = VmCore::new(config, catalog);
        let host = FakeHost {
            mode: Mode::Supervisor,
            satp: 0,
            hgatp: 0,
        };
        invalidate_all_asid(&mut core, &host, 7);
    }
}
