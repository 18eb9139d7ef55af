pub mod asid;
pub mod config;
pub mod csr;
pub mod domain;
pub mod error;
pub mod invalidate;
pub mod mode;
pub mod orchestrator;
pub mod pmp;
pub mod snapshot;
pub mod tlb;
pub mod walker;

pub use config::CoreConfig;
pub use csr::HostProcessor;
pub use domain::{Domain, DomainHandle, DomainKind, Endian, Perm};
pub use error::{AccessType, DomainError, Trap};
pub use mode::{BaseMode, Mode};
pub use orchestrator::{DomainCatalog, VmCore};
pub use tlb::TlbId;

/// `vm_free` — release a core's TLBs, PMP state, and domain catalog. Plain
/// `drop(core)` does the same thing; this exists so callers that mirror the
/// reference walker's explicit teardown call have a matching name to call.
pub fn vm_free(core: VmCore) {
    drop(core);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainKind, TestDomain};
    use crate::mode::{BaseMode, Mode};

    struct FakeHost {
        mode: Mode,
        satp: u64,
        raised: Vec<Trap>,
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
            0
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
        fn raise_exception(&mut self, trap: Trap) {
            self.raised.push(trap);
        }
        fn notify_asid_changed(&mut self, _composite: u64) {}
        fn reselect_data_domain(&mut self, _mode: Mode) {}
    }

    #[test]
    fn bare_mode_identity_maps_and_retries() {
        let mut catalog = DomainCatalog::new();
        let data = catalog.register(Box::new(TestDomain::new()), DomainKind::Virtual);
        let ptw = catalog.register(Box::new(TestDomain::new()), DomainKind::Pmp);
        let mut core = VmCore::new(CoreConfig::default(), catalog);
        let mut host = FakeHost {
            mode: Mode::Supervisor,
            satp: 0, // satp.MODE == 0 => Bare
            raised: Vec::new(),
        };

        let retry = core.miss(&mut host, data, ptw, AccessType::Load, 0x2000, 8);
        assert!(retry);
        assert!(host.raised.is_empty());
    }

    #[test]
    fn vm_free_drops_core_without_panicking() {
        let catalog = DomainCatalog::new();
        let core = VmCore::new(CoreConfig::default(), catalog);
        vm_free(core);
    }
}
