//! Translation Orchestrator (§4.1) and Permission Check (§4.4).
//!
//! Ties the per-identity [`Tlb`]s, the [`PmpUnit`], the domain catalog, and
//! the [`HostProcessor`] collaborator together into the one operation a host
//! simulator actually calls on a TLB miss. Grounded on the reference
//! walker's `riscvVMMiss`/`tlbMiss`/`mapTLBEntry`/`checkEntryPermission` for
//! the control flow, generalized onto this crate's `Tlb`/`PmpUnit`/`Domain`
//! types instead of the reference's opaque memory-domain and TLB-entry
//! pointers.

use crate::asid::{SimAsid, SimAsidMask};
use crate::config::CoreConfig;
use crate::csr::HostProcessor;
use crate::domain::{Domain, DomainHandle, DomainKind, Endian, Perm};
use crate::error::{AccessType, Trap};
use crate::mode::BaseMode;
use crate::pmp::PmpUnit;
use crate::tlb::{AccessKind, MappedMask, Tlb, TlbEntry, TlbId};
use crate::walker::{self, TranslationMode, WalkParams, WalkResult};

/// Per-domain classification the orchestrator consults before deciding
/// whether a miss needs a page-table walk at all (`getDomainType`).
#[derive(Default)]
pub struct DomainCatalog {
    domains: Vec<Box<dyn Domain>>,
    kinds: Vec<DomainKind>,
}

impl DomainCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host-owned domain, returning the handle the host passes
    /// back into [`VmCore::miss`].
    pub fn register(&mut self, domain: Box<dyn Domain>, kind: DomainKind) -> DomainHandle {
        self.domains.push(domain);
        self.kinds.push(kind);
        DomainHandle(self.domains.len() - 1)
    }

    pub fn kind(&self, handle: DomainHandle) -> DomainKind {
        self.kinds[handle.0]
    }

    pub fn get_mut(&mut self, handle: DomainHandle) -> &mut dyn Domain {
        self.domains[handle.0].as_mut()
    }

    /// Every registered domain of a given kind, e.g. the S-mode/M-mode PMP
    /// domains a PMP register write must un-protect (§4.5).
    pub(crate) fn handles_of_kind(&self, kind: DomainKind) -> Vec<DomainHandle> {
        self.kinds
            .iter()
            .enumerate()
            .filter(|(_, k)| **k == kind)
            .map(|(i, _)| DomainHandle(i))
            .collect()
    }
}

/// Per-hart translation/protection state: one TLB per identity, the PMP
/// unit, and the domain catalog. The stable public surface in
/// [`crate::lib`] is a thin wrapper over this type's methods.
pub struct VmCore {
    config: CoreConfig,
    tlb_hs: Tlb,
    tlb_vs1: Tlb,
    tlb_vs2: Tlb,
    pmp: PmpUnit,
    domains: DomainCatalog,
}

fn translation_mode_for(atp_mode: u64) -> Option<TranslationMode> {
    match atp_mode {
        0 => None,
        8 => Some(TranslationMode::Sv39),
        9 => Some(TranslationMode::Sv48),
        _ => Some(TranslationMode::Sv32),
    }
}

/// Width in bits of the guest-physical address space a base translation
/// mode's ×4 second-stage format walks normally, i.e. everything below the
/// 2-bit guest offset (§4.3 step 2).
fn stage2_width_bits(mode: TranslationMode) -> u32 {
    match mode {
        TranslationMode::Sv32 => 32,
        TranslationMode::Sv39 => 39,
        TranslationMode::Sv48 => 48,
        TranslationMode::Bare => unreachable!("Bare has no stage-2 width"),
    }
}

/// Remove every domain alias an evicted entry was carrying (§4.2: "Deletion
/// removes all domain aliases referenced by `mapped` before releasing to the
/// free list"). Passed as the `on_evict` callback to [`Tlb`]'s eviction
/// methods.
fn unalias_entry(domains: &mut DomainCatalog, entry: &TlbEntry) {
    for &handle in &entry.alias_domains {
        domains.get_mut(handle).remove_alias(
            entry.low_va,
            entry.high_va,
            entry.asid_mask.0,
            entry.sim_asid.0,
        );
    }
}

impl VmCore {
    /// `vm_init` — allocate per-identity TLBs and a PMP unit sized from
    /// `config`, taking ownership of the host-provided domain catalog.
    pub fn new(config: CoreConfig, domains: DomainCatalog) -> VmCore {
        VmCore {
            pmp: PmpUnit::new(config.pmp_regions, config.pmp_grain),
            config,
            tlb_hs: Tlb::new(),
            tlb_vs1: Tlb::new(),
            tlb_vs2: Tlb::new(),
            domains,
        }
    }

    fn tlb_mut(&mut self, id: TlbId) -> &mut Tlb {
        match id {
            TlbId::Hs => &mut self.tlb_hs,
            TlbId::Vs1 => &mut self.tlb_vs1,
            TlbId::Vs2 => &mut self.tlb_vs2,
        }
    }

    fn tlb(&self, id: TlbId) -> &Tlb {
        match id {
            TlbId::Hs => &self.tlb_hs,
            TlbId::Vs1 => &self.tlb_vs1,
            TlbId::Vs2 => &self.tlb_vs2,
        }
    }

    /// Disjoint-borrow helper: a TLB-eviction callback needs simultaneous
    /// mutable access to one `Tlb` and the whole [`DomainCatalog`] to tear
    /// down aliases as entries are freed. Matching directly on `self`'s
    /// fields (rather than going through [`VmCore::tlb_mut`], which takes
    /// `&mut self` monolithically) lets the borrow checker see the two
    /// borrows as disjoint.
    fn split_tlb_and_domains(&mut self, id: TlbId) -> (&mut Tlb, &mut DomainCatalog) {
        match id {
            TlbId::Hs => (&mut self.tlb_hs, &mut self.domains),
            TlbId::Vs1 => (&mut self.tlb_vs1, &mut self.domains),
            TlbId::Vs2 => (&mut self.tlb_vs2, &mut self.domains),
        }
    }

    /// Clamp an about-to-be-aliased VA range to the host's configured
    /// maximum alias span (§4.1 "Virtual range cap"), preserving the low
    /// bound (and hence its paired physical address) and shrinking the high
    /// bound.
    fn capped_range(&self, low_va: u64, high_va: u64) -> (u64, u64) {
        let span = high_va - low_va + 1;
        if self.config.max_alias_span > 0 && span > self.config.max_alias_span {
            (low_va, low_va + self.config.max_alias_span - 1)
        } else {
            (low_va, high_va)
        }
    }

    /// Un-protect `bounds` in every PMP-gated domain (§4.5
    /// `invalidate_pmp_entry`: "removes the region's protection from the
    /// S-mode and (if affected) M-mode PMP domains"). The next access-miss
    /// through [`VmCore::refine_physical`] re-grants whatever the PMP table
    /// now allows.
    fn invalidate_pmp_region(&mut self, bounds: (u64, u64)) {
        let (lo, hi) = bounds;
        for handle in self.domains.handles_of_kind(DomainKind::Pmp) {
            self.domains.get_mut(handle).protect(lo, hi, Perm::NONE);
        }
    }

    /// Shared stage-1/stage-2 walk entry point. For a stage-2 (`stage2 =
    /// true`) walk, `va` is actually a guest-physical address: its top 2
    /// bits above the base mode's width select one of the four root tables
    /// (§4.3 step 2), and are restored into the returned [`WalkResult`]'s VA
    /// range afterward so composition can compare it directly against the
    /// guest-physical address it was computed from.
    fn walk_root(
        &mut self,
        ptw_domain: DomainHandle,
        mode: TranslationMode,
        root_ppn: u64,
        va: u64,
        access: AccessType,
        kind: AccessKind,
        stage2: bool,
    ) -> Result<WalkResult, Trap> {
        let (guest_offset, walk_va, width) = if stage2 {
            let width = stage2_width_bits(mode);
            (
                (va >> width) & 0b11,
                va & ((1u64 << width) - 1),
                Some(width),
            )
        } else {
            (0, va, None)
        };

        let params = WalkParams {
            mode,
            root_ppn,
            va: walk_va,
            access,
            endian: Endian::Little,
            hardware_ad: self.config.hardware_ad,
            kind,
            guest_offset,
            stage2,
        };
        let ptw = self.domains.get_mut(ptw_domain);
        let mut result = walker::walk(&params, ptw)?;
        if let Some(width) = width {
            let offset_bits = guest_offset << width;
            result.low_va |= offset_bits;
            result.high_va |= offset_bits;
        }
        Ok(result)
    }

    /// Select the active TLB identity for the host's current mode and
    /// translation-root state (§4.1 step 3a).
    fn active_identity(host: &dyn HostProcessor) -> TlbId {
        if !host.mode().is_virtual() {
            return TlbId::Hs;
        }
        let vsatp = crate::csr::decode_satp(host.vsatp());
        if vsatp.mode != 0 {
            return TlbId::Vs1;
        }
        TlbId::Vs2
    }

    /// `vm_miss` — called by the host when it encounters a virtual address
    /// with no live alias. Returns `true` if the caller should retry the
    /// access (an alias was installed), `false` if an exception was already
    /// reported to the host. `ptw_domain` is the (PMP-checked) domain page
    /// tables themselves are read and written through.
    pub fn miss(
        &mut self,
        host: &mut dyn HostProcessor,
        domain: DomainHandle,
        ptw_domain: DomainHandle,
        access: AccessType,
        va: u64,
        bytes: u64,
    ) -> bool {
        match self.domains.kind(domain) {
            DomainKind::Virtual => {
                let mut offset = 0u64;
                while offset < bytes {
                    let segment_va = va + offset;
                    let id = Self::active_identity(&*host);
                    let ok =
                        self.miss_segment(host, domain, ptw_domain, access, segment_va, id);
                    if !ok {
                        return false;
                    }
                    let advanced = self
                        .tlb(id)
                        .entries_in_range(segment_va, segment_va)
                        .first()
                        .map(|e| e.high_va - segment_va + 1)
                        .unwrap_or(1);
                    offset += advanced.max(1);
                }
                true
            }
            DomainKind::Physical | DomainKind::Pmp => {
                self.refine_physical(host, domain, access, va, bytes)
            }
        }
    }

    fn miss_segment(
        &mut self,
        host: &mut dyn HostProcessor,
        domain: DomainHandle,
        ptw_domain: DomainHandle,
        access: AccessType,
        va: u64,
        id: TlbId,
    ) -> bool {
        let current = SimAsid::current(&*host);

        if let Some(entry) = self.tlb_mut(id).find(va, current, AccessKind::Real).cloned() {
            return self.handle_hit(host, domain, ptw_domain, id, entry, access, va, current);
        }

        self.walk_and_install(host, domain, ptw_domain, id, access, va, current)
    }

    fn handle_hit(
        &mut self,
        host: &mut dyn HostProcessor,
        domain: DomainHandle,
        ptw_domain: DomainHandle,
        id: TlbId,
        entry: TlbEntry,
        access: AccessType,
        va: u64,
        current: SimAsid,
    ) -> bool {
        let stage2 = matches!(id, TlbId::Vs2);
        let granted = check_permission(
            entry.priv_mask,
            access,
            host.mode().base(),
            entry.u_bit,
            mxr_for(&*host, id),
            sum_for(&*host, id),
            stage2,
            self.config.priv_version_ge_1_11,
        );

        let required = required_perm(access);
        match granted {
            Some(g) if g.contains(required) => {
                if access == AccessType::Store && !entry.d_bit {
                    let (tlb, domains) = self.split_tlb_and_domains(id);
                    tlb.invalidate_range(entry.low_va, entry.high_va, None, &mut |e| {
                        unalias_entry(domains, e)
                    });
                    return self.walk_and_install(host, domain, ptw_domain, id, access, va, current);
                }
                let base_mode = host.mode().base();
                let (lo, hi) = self.capped_range(entry.low_va, entry.high_va);
                self.tlb_mut(id).note_alias(va, current, base_mode, domain);
                self.domains.get_mut(domain).install_alias(
                    lo,
                    hi,
                    entry.low_pa,
                    entry.priv_mask,
                    entry.asid_mask.0,
                    entry.sim_asid.0,
                );
                true
            }
            _ => {
                host.raise_exception(Trap::page_fault(access, va, stage2));
                false
            }
        }
    }

    fn walk_and_install(
        &mut self,
        host: &mut dyn HostProcessor,
        domain: DomainHandle,
        ptw_domain: DomainHandle,
        id: TlbId,
        access: AccessType,
        va: u64,
        current: SimAsid,
    ) -> bool {
        let atp_raw = match id {
            TlbId::Hs => host.satp(),
            TlbId::Vs1 => host.vsatp(),
            TlbId::Vs2 => host.hgatp(),
        };
        let atp = if matches!(id, TlbId::Vs2) {
            crate::csr::decode_hgatp(atp_raw)
        } else {
            crate::csr::decode_satp(atp_raw)
        };

        let entry = match translation_mode_for(atp.mode) {
            None => bare_entry(id, va, self.config.asid_bits == 0, current),
            Some(mode) => {
                let stage2 = matches!(id, TlbId::Vs2);
                let result = match self.walk_root(
                    ptw_domain,
                    mode,
                    atp.ppn,
                    va,
                    access,
                    AccessKind::Real,
                    stage2,
                ) {
                    Ok(r) => r,
                    Err(trap) => {
                        host.raise_exception(trap);
                        return false;
                    }
                };
                self.materialize(id, result, current)
            }
        };

        self.finish_walk(host, domain, ptw_domain, id, entry, access, va, current)
    }

    fn finish_walk(
        &mut self,
        host: &mut dyn HostProcessor,
        domain: DomainHandle,
        ptw_domain: DomainHandle,
        id: TlbId,
        entry: TlbEntry,
        access: AccessType,
        va: u64,
        current: SimAsid,
    ) -> bool {
        let stage2 = matches!(id, TlbId::Vs2);
        let granted = check_permission(
            entry.priv_mask,
            access,
            host.mode().base(),
            entry.u_bit,
            mxr_for(&*host, id),
            sum_for(&*host, id),
            stage2,
            self.config.priv_version_ge_1_11,
        );
        let required = required_perm(access);
        if !matches!(granted, Some(g) if g.contains(required)) {
            host.raise_exception(Trap::page_fault(access, va, stage2));
            return false;
        }

        let final_entry = if id == TlbId::Vs1 {
            match self.compose_two_stage(host, ptw_domain, entry, va, access, current) {
                Ok(e) => e,
                Err(trap) => {
                    host.raise_exception(trap);
                    return false;
                }
            }
        } else {
            entry
        };

        let base_mode = host.mode().base();
        let (lo, hi) = self.capped_range(final_entry.low_va, final_entry.high_va);
        self.tlb_mut(final_entry.tlb_id)
            .insert(final_entry.clone(), AccessKind::Real);
        self.tlb_mut(final_entry.tlb_id)
            .note_alias(va, current, base_mode, domain);
        self.domains.get_mut(domain).install_alias(
            lo,
            hi,
            final_entry.low_pa,
            final_entry.priv_mask,
            final_entry.asid_mask.0,
            final_entry.sim_asid.0,
        );
        true
    }

    fn materialize(&self, id: TlbId, result: WalkResult, current: SimAsid) -> TlbEntry {
        let created_virtual = matches!(id, TlbId::Vs1 | TlbId::Vs2);
        let global = result.g_bit || self.config.asid_bits == 0 || matches!(id, TlbId::Vs2);
        let mask = SimAsidMask::for_entry(id, global, result.u_bit, true, created_virtual);
        TlbEntry {
            low_va: result.low_va,
            high_va: result.high_va,
            low_pa: result.low_pa,
            priv_mask: result.priv_mask,
            u_bit: result.u_bit,
            g_bit: global,
            a_bit: result.a_bit,
            d_bit: result.d_bit,
            tlb_id: id,
            mapped: MappedMask::NONE,
            sim_asid: current,
            asid_mask: mask,
            alias_domains: Vec::new(),
            artifact: false,
        }
    }

    /// §4.1 "Two-stage composition": when a VS1 entry is installed under an
    /// active stage-2 (`hgatp.MODE != 0`), its guest-physical range is itself
    /// walked through stage 2 and the two translations are composed into one
    /// guest-virtual -> host-physical entry. The composed VA range is
    /// narrowed to whichever of the two translations covers less (a
    /// superpage on one side doesn't widen what the other side actually
    /// maps), and its ASID mask also becomes sensitive to the stage-2 tag
    /// (VMID, stage-2 status bits) so that a stage-2-only change still
    /// invalidates it, per the open-question resolution of OR-combining
    /// rather than splitting the two masks.
    fn compose_two_stage(
        &mut self,
        host: &mut dyn HostProcessor,
        ptw_domain: DomainHandle,
        e1: TlbEntry,
        va: u64,
        access: AccessType,
        current: SimAsid,
    ) -> Result<TlbEntry, Trap> {
        let hgatp = crate::csr::decode_hgatp(host.hgatp());
        if hgatp.mode == 0 {
            return Ok(e1);
        }

        let gpa = e1.translate(va);
        let mode2 = translation_mode_for(hgatp.mode)
            .expect("hgatp.mode != 0 always maps to a translation mode");

        let e2 = self
            .walk_root(ptw_domain, mode2, hgatp.ppn, gpa, access, AccessKind::Real, true)
            .map_err(|_| Trap::page_fault(access, gpa, true))?;

        let mask2 = SimAsidMask::for_entry(TlbId::Vs2, false, false, false, true);
        let offset_lo = gpa - e2.low_va;
        let offset_hi = e2.high_va - gpa;
        let low_va = e1.low_va.max(va.saturating_sub(offset_lo));
        let high_va = e1.high_va.min(va.saturating_add(offset_hi));
        let low_pa = e2.low_pa + offset_lo;

        Ok(TlbEntry {
            low_va,
            high_va,
            low_pa,
            asid_mask: e1.asid_mask.combine(mask2),
            sim_asid: current,
            alias_domains: Vec::new(),
            ..e1
        })
    }

    fn refine_physical(
        &mut self,
        host: &mut dyn HostProcessor,
        domain: DomainHandle,
        access: AccessType,
        va: u64,
        bytes: u64,
    ) -> bool {
        let required = required_perm(access);
        match self
            .pmp
            .map_pmp(host.mode().base(), required, va, va + bytes - 1)
        {
            Ok(granted) => {
                self.domains
                    .get_mut(domain)
                    .protect(va, va + bytes - 1, granted);
                true
            }
            Err(_) => {
                host.raise_exception(Trap::access_fault(access, va));
                false
            }
        }
    }

    // -- Invalidation engine (§4.7) --

    pub fn invalidate_all(&mut self, id: TlbId) {
        let (tlb, domains) = self.split_tlb_and_domains(id);
        tlb.flush_all(&mut |e| unalias_entry(domains, e));
    }

    /// `asid_field` must already be masked to the implemented width; see
    /// [`crate::invalidate`] for the public, unmasked entry points.
    pub fn invalidate_all_asid(&mut self, id: TlbId, asid_field: u16, current_vmid: u16) {
        let (tlb, domains) = self.split_tlb_and_domains(id);
        tlb.invalidate_asid_qualified(0, u64::MAX, asid_field, current_vmid, &mut |e| {
            unalias_entry(domains, e)
        });
    }

    pub fn invalidate_va(&mut self, id: TlbId, va: u64) {
        let (tlb, domains) = self.split_tlb_and_domains(id);
        tlb.invalidate_range(va, va, None, &mut |e| unalias_entry(domains, e));
    }

    pub fn invalidate_va_asid(&mut self, id: TlbId, va: u64, asid_field: u16, current_vmid: u16) {
        let (tlb, domains) = self.split_tlb_and_domains(id);
        tlb.invalidate_asid_qualified(va, va, asid_field, current_vmid, &mut |e| {
            unalias_entry(domains, e)
        });
    }

    /// `vm_set_asid` — notify the host of the composite ASID now in force.
    pub fn set_asid(&mut self, host: &mut dyn HostProcessor) {
        let current = SimAsid::current(&*host);
        host.notify_asid_changed(current.0);
    }

    /// `vm_refresh_mprv_domain` — re-select the current data domain after
    /// `mstatus.MPRV`/`MPP`/`MPV` changes.
    pub fn refresh_mprv_domain(&mut self, host: &mut dyn HostProcessor) {
        let mode = if host.mstatus_mprv() {
            if mode_rank(host.mstatus_mpp()) > mode_rank(host.mode().base()) {
                log::warn!("MPRV selects a higher-privileged mode than current execution");
            }
            crate::mode::Mode::with_virt(host.mstatus_mpp(), host.mstatush_mpv())
        } else {
            host.mode()
        };
        host.reselect_data_domain(mode);
    }

    pub fn pmp_read_cfg(&self, i: usize) -> u8 {
        self.pmp.read_cfg(i)
    }

    /// Writes `pmpcfg[i]`, un-protecting the region's old and new bounds at
    /// the domain layer before and after the change (§4.5
    /// `invalidate_pmp_entry`) so a narrowed or disabled region can't leave a
    /// stale, wider grant live.
    pub fn pmp_write_cfg(&mut self, i: usize, v: u8) {
        if let Some(bounds) = self.pmp.bounds(i) {
            self.invalidate_pmp_region(bounds);
        }
        self.pmp.write_cfg(i, v);
        if let Some(bounds) = self.pmp.bounds(i) {
            self.invalidate_pmp_region(bounds);
        }
    }
    pub fn pmp_read_addr(&self, i: usize) -> u64 {
        self.pmp.read_addr(i)
    }

    /// Writes `pmpaddr[i]`, with the same before/after domain invalidation
    /// as [`VmCore::pmp_write_cfg`].
    pub fn pmp_write_addr(&mut self, i: usize, v: u64) {
        if let Some(bounds) = self.pmp.bounds(i) {
            self.invalidate_pmp_region(bounds);
        }
        self.pmp.write_addr(i, v);
        if let Some(bounds) = self.pmp.bounds(i) {
            self.invalidate_pmp_region(bounds);
        }
    }
    pub fn pmp_reset(&mut self) {
        self.pmp.reset_all();
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub(crate) fn tlb_for_snapshot(&self, id: TlbId) -> &Tlb {
        self.tlb(id)
    }

    pub(crate) fn tlb_mut_for_restore(&mut self, id: TlbId) -> &mut Tlb {
        self.tlb_mut(id)
    }
}

fn mode_rank(m: BaseMode) -> u8 {
    match m {
        BaseMode::User => 0,
        BaseMode::Supervisor => 1,
        BaseMode::Machine => 2,
    }
}

fn required_perm(access: AccessType) -> Perm {
    match access {
        AccessType::Instruction => Perm::X,
        AccessType::Load => Perm::R,
        AccessType::Store => Perm::W,
    }
}

fn mxr_for(host: &dyn HostProcessor, id: TlbId) -> bool {
    match id {
        TlbId::Vs1 => host.vsstatus_mxr(),
        _ => host.mstatus_mxr(),
    }
}

fn sum_for(host: &dyn HostProcessor, id: TlbId) -> bool {
    match id {
        TlbId::Vs1 => host.vsstatus_sum(),
        _ => host.mstatus_sum(),
    }
}

/// Full leaf permission check (§4.4), applied uniformly whether the entry
/// came from a TLB hit or a fresh walk. Returns the granted privilege set
/// on success, `None` if the access must be denied.
#[allow(clippy::too_many_arguments)]
pub fn check_permission(
    entry_priv: Perm,
    access: AccessType,
    effective_mode: BaseMode,
    u_bit: bool,
    mxr: bool,
    sum: bool,
    stage2: bool,
    priv_version_ge_1_11: bool,
) -> Option<Perm> {
    let mode = if stage2 { BaseMode::User } else { effective_mode };

    let mut granted = entry_priv;
    if mxr && entry_priv.contains(Perm::X) {
        granted = granted.union(Perm::R);
    }

    match mode {
        BaseMode::User => {
            if !u_bit {
                return None;
            }
        }
        BaseMode::Supervisor => {
            if u_bit {
                if !sum {
                    return None;
                }
                if access == AccessType::Instruction && priv_version_ge_1_11 {
                    return None;
                }
            }
        }
        BaseMode::Machine => {}
    }

    let required = required_perm(access);
    if granted.contains(required) {
        Some(granted)
    } else {
        None
    }
}

fn bare_entry(id: TlbId, va: u64, force_global: bool, current: SimAsid) -> TlbEntry {
    let page = va & !0xFFF;
    TlbEntry {
        low_va: page,
        high_va: page + 0xFFF,
        low_pa: page,
        priv_mask: Perm::RWX,
        u_bit: true,
        g_bit: force_global,
        a_bit: true,
        d_bit: true,
        tlb_id: id,
        mapped: MappedMask::NONE,
        sim_asid: current,
        asid_mask: SimAsidMask::for_entry(id, force_global, false, false, false),
        alias_domains: Vec::new(),
        artifact: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TestDomain;
    use std::sync::{Arc, Mutex};

    const PTE_V: u64 = 1 << 0;
    const PTE_R: u64 = 1 << 1;
    const PTE_W: u64 = 1 << 2;
    const PTE_U: u64 = 1 << 4;
    const PTE_A: u64 = 1 << 6;
    const PTE_D: u64 = 1 << 7;

    struct TwoStageHost {
        mode: crate::mode::Mode,
        vsatp: u64,
        hgatp: u64,
        raised: Vec<Trap>,
    }

    impl HostProcessor for TwoStageHost {
        fn mode(&self) -> crate::mode::Mode {
            self.mode
        }
        fn satp(&self) -> u64 {
            0
        }
        fn vsatp(&self) -> u64 {
            self.vsatp
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
            true
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
        fn reselect_data_domain(&mut self, _mode: crate::mode::Mode) {}
    }

    /// §8 scenario 4: stage-1 `VA[0..0xFFF] -> GPA 0x1000`, stage-2
    /// `GPA[0..0x1FFFFF] -> PA 0x200000`; the composed alias must be
    /// `VA[0..0xFFF] -> PA 0x201000`, not the guest-physical address left
    /// bare.
    #[test]
    fn two_stage_composition_narrows_range_and_computes_host_pa() {
        let mut ptw = TestDomain::new();

        // Stage-1 (VS1, Sv39): a plain 3-level walk down to a 4KiB leaf.
        let (root1, mid1, leaf1) = (0x80u64, 0x81u64, 0x82u64);
        ptw.seed(root1 * 4096, PTE_V | (mid1 << 10));
        ptw.seed(mid1 * 4096, PTE_V | (leaf1 << 10));
        ptw.seed(
            leaf1 * 4096,
            PTE_V | PTE_R | PTE_W | PTE_U | PTE_A | PTE_D | (1u64 << 10),
        );

        // Stage-2 (VS2, Sv39x4): a 2MiB leaf at level 1 covering the GPA.
        let (root2, mid2) = (0x90u64, 0x91u64);
        ptw.seed(root2 * 4096, PTE_V | (mid2 << 10));
        ptw.seed(
            mid2 * 4096,
            PTE_V | PTE_R | PTE_W | PTE_U | PTE_A | PTE_D | (0x200u64 << 10),
        );

        let mut catalog = DomainCatalog::new();
        let data = catalog.register(Box::new(TestDomain::new()), DomainKind::Virtual);
        let ptw_handle = catalog.register(Box::new(ptw), DomainKind::Pmp);
        let mut core = VmCore::new(CoreConfig::default(), catalog);

        let mut host = TwoStageHost {
            mode: crate::mode::Mode::VirtSupervisor,
            vsatp: (8u64 << 60) | root1,
            hgatp: (8u64 << 60) | root2,
            raised: Vec::new(),
        };

        let retry = core.miss(&mut host, data, ptw_handle, AccessType::Load, 0, 8);
        assert!(retry, "expected a successful two-stage walk, got {:?}", host.raised);

        let entries = core.tlb_for_snapshot(TlbId::Vs1).entries_in_range(0, 0);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].low_va, 0);
        assert_eq!(entries[0].high_va, 0xFFF);
        assert_eq!(entries[0].low_pa, 0x201000);
    }

    struct ProtectSpy {
        log: Arc<Mutex<Vec<(u64, u64, Perm)>>>,
    }

    impl Domain for ProtectSpy {
        fn read(&self, _pa: u64, _size: u8, _endian: Endian) -> Result<u64, crate::error::DomainError> {
            Ok(0)
        }
        fn write(
            &mut self,
            _pa: u64,
            _size: u8,
            _endian: Endian,
            _value: u64,
        ) -> Result<(), crate::error::DomainError> {
            Ok(())
        }
        fn install_alias(&mut self, _: u64, _: u64, _: u64, _: Perm, _: u64, _: u64) {}
        fn remove_alias(&mut self, _: u64, _: u64, _: u64, _: u64) {}
        fn protect(&mut self, lo_pa: u64, hi_pa: u64, priv_mask: Perm) {
            self.log.lock().unwrap().push((lo_pa, hi_pa, priv_mask));
        }
    }

    /// §4.5: a PMP cfg/addr write must un-protect the region's old and new
    /// bounds at the domain layer, not just update the register file.
    #[test]
    fn pmp_write_invalidates_old_and_new_domain_grant() {
        let log: Arc<Mutex<Vec<(u64, u64, Perm)>>> = Arc::new(Mutex::new(Vec::new()));
        let mut catalog = DomainCatalog::new();
        catalog.register(Box::new(ProtectSpy { log: log.clone() }), DomainKind::Pmp);
        let mut core = VmCore::new(CoreConfig::default(), catalog);

        core.pmp_write_addr(0, 0x1000);
        core.pmp_write_cfg(0, 0x17); // NA4, RWX
        assert_eq!(log.lock().unwrap().len(), 1);

        core.pmp_write_addr(0, 0x2000);
        let calls = log.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].0, 0x1000 << 2);
        assert_eq!(calls[2].0, 0x2000 << 2);
        assert_ne!(calls[1].0, calls[2].0);
    }

    #[test]
    fn user_mode_denies_non_user_page() {
        let granted = check_permission(
            Perm::RW,
            AccessType::Load,
            BaseMode::User,
            false,
            false,
            false,
            false,
            true,
        );
        assert!(granted.is_none());
    }

    #[test]
    fn mxr_grants_read_on_exec_only_page() {
        let granted = check_permission(
            Perm::X,
            AccessType::Load,
            BaseMode::User,
            true,
            true,
            false,
            false,
            true,
        );
        assert_eq!(granted, Some(Perm::X.union(Perm::R)));
    }

    #[test]
    fn supervisor_denies_user_page_without_sum() {
        let granted = check_permission(
            Perm::RW,
            AccessType::Load,
            BaseMode::Supervisor,
            true,
            false,
            false,
            false,
            true,
        );
        assert!(granted.is_none());
    }

    #[test]
    fn supervisor_fetch_of_user_page_denied_post_1_11_even_with_sum() {
        let granted = check_permission(
            Perm::RWX,
            AccessType::Instruction,
            BaseMode::Supervisor,
            true,
            false,
            true,
            false,
            true,
        );
        assert!(granted.is_none());
    }

    #[test]
    fn stage2_checks_always_as_user() {
        let granted = check_permission(
            Perm::RW,
            AccessType::Load,
            BaseMode::Supervisor,
            true,
            false,
            false,
            true,
            true,
        );
        assert!(granted.is_some());
    }

    #[test]
    fn mode_rank_orders_user_below_machine() {
        assert!(mode_rank(BaseMode::User) < mode_rank(BaseMode::Machine));
    }
}
