//! Per-stage translation cache.
//!
//! Grounded on the host simulator's `TlbEntry`/`Tlb` in `mmu.rs` for the
//! entry shape and lookup/insert/flush operations, and on the reference
//! walker's `tlbEntryS`/`newTLBEntry`/`allocateTLBEntry`/`deleteTLBEntry`/
//! `getTLBEntryForRange`/`firstTLBEntryRange`/`nextTLBEntryRange` for the
//! free-list-backed storage and range-scan semantics. The reference entry's
//! `union { nextFree; lutEntry; size }` is reimplemented as a proper sum type
//! (`Slot`) per the design notes rather than a transmute union — there is no
//! wire format riding on its layout, and a free slot can never be read as a
//! live entry by the type system here.

use crate::asid::{SimAsid, SimAsidMask};
use crate::domain::DomainHandle;
use crate::mode::BaseMode;

/// Which of the three translation identities (§1, §4.1) an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TlbId {
    /// HS-stage (or non-virtualized) translation.
    Hs,
    /// VS-stage-1 (guest virtual -> guest physical).
    Vs1,
    /// VS-stage-2 (guest physical -> host physical).
    Vs2,
}

/// Whether a lookup/miss is a debug/inspection probe or a real access that
/// may allocate, evict, and otherwise perturb simulation state (§4.2
/// "Artifact accesses").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Real,
    Artifact,
}

/// Bitmask of base privilege modes (§1 `Mode`) an entry is currently aliased
/// into, mirroring the reference entry's `mapped` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct MappedMask(pub u8);

impl MappedMask {
    pub const NONE: MappedMask = MappedMask(0);

    pub fn bit(base: crate::mode::BaseMode) -> u8 {
        match base {
            crate::mode::BaseMode::User => 1 << 0,
            crate::mode::BaseMode::Supervisor => 1 << 1,
            crate::mode::BaseMode::Machine => 1 << 2,
        }
    }

    pub fn set(&mut self, base: crate::mode::BaseMode) {
        self.0 |= Self::bit(base);
    }

    pub fn clear(&mut self, base: crate::mode::BaseMode) {
        self.0 &= !Self::bit(base);
    }

    pub fn contains(self, base: crate::mode::BaseMode) -> bool {
        self.0 & Self::bit(base) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// A single cached translation covering `[low_va, high_va]` (inclusive),
/// installed for one [`TlbId`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TlbEntry {
    pub low_va: u64,
    pub high_va: u64,
    pub low_pa: u64,
    pub priv_mask: crate::domain::Perm,
    pub u_bit: bool,
    pub g_bit: bool,
    pub a_bit: bool,
    pub d_bit: bool,
    pub tlb_id: TlbId,
    pub mapped: MappedMask,
    pub sim_asid: SimAsid,
    pub asid_mask: SimAsidMask,
    /// Domains this entry currently has a live virtual alias installed in
    /// (§4.2: "mapped" tracks which domain aliases must be torn down before
    /// the entry is released to the free list). Populated by
    /// [`Tlb::note_alias`] as [`crate::orchestrator`] installs aliases, and
    /// walked by the caller on every eviction path to call
    /// `Domain::remove_alias`.
    pub alias_domains: Vec<DomainHandle>,
    /// Set when this entry was installed by an artifact (debug) access and
    /// must never be observed by a real one; lazily reclaimed on the next
    /// real range scan (§4.2).
    pub artifact: bool,
}

impl TlbEntry {
    pub fn contains_va(&self, va: u64) -> bool {
        va >= self.low_va && va <= self.high_va
    }

    pub fn overlaps_range(&self, lo: u64, hi: u64) -> bool {
        self.low_va <= hi && lo <= self.high_va
    }

    pub fn translate(&self, va: u64) -> u64 {
        self.low_pa + (va - self.low_va)
    }

    /// Does this entry still match the ASID/VMID/status bits currently in
    /// force, per its own [`SimAsidMask`]?
    pub fn matches_asid(&self, current: SimAsid) -> bool {
        self.asid_mask.apply(self.sim_asid) == self.asid_mask.apply(current)
    }
}

/// One storage cell: either free (and linked into the free list) or holding
/// a live entry. Replaces the reference implementation's union.
#[derive(Debug, Clone)]
enum Slot {
    Free { next_free: Option<usize> },
    Used(TlbEntry),
}

/// Free-list-backed, range-scanned translation cache for one [`TlbId`].
///
/// Lookup and invalidation are O(n) over live entries, matching the
/// reference implementation's asymptotic behavior for realistic working
/// sets (it uses a sorted LUT for the same purpose; this crate favors a
/// simpler structure since raw lookup throughput is explicitly out of
/// scope, §8).
#[derive(Debug, Default)]
pub struct Tlb {
    slots: Vec<Slot>,
    free_head: Option<usize>,
}

impl Tlb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-free) entries, including stale artifact ones not
    /// yet reclaimed.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Used(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn alloc_slot(&mut self) -> usize {
        if let Some(idx) = self.free_head {
            let next = match &self.slots[idx] {
                Slot::Free { next_free } => *next_free,
                Slot::Used(_) => unreachable!("free list points at a used slot"),
            };
            self.free_head = next;
            idx
        } else {
            self.slots.push(Slot::Free { next_free: None });
            self.slots.len() - 1
        }
    }

    fn free_slot(&mut self, idx: usize) {
        self.slots[idx] = Slot::Free {
            next_free: self.free_head,
        };
        self.free_head = Some(idx);
    }

    /// Insert a newly built entry, tagging it as artifact per `kind`
    /// (`newTLBEntry` + `allocateTLBEntry`, which stamps `artifact` from the
    /// hart's current access mode before anything else runs).
    pub fn insert(&mut self, mut entry: TlbEntry, kind: AccessKind) -> usize {
        entry.artifact = matches!(kind, AccessKind::Artifact);
        let idx = self.alloc_slot();
        self.slots[idx] = Slot::Used(entry);
        idx
    }

    /// Shared lookup core for [`Tlb::find`] and [`Tlb::note_alias`]: finds the
    /// slot index covering `va` for the given ASID state, dropping any stale
    /// artifact entry encountered along the way (§4.2: "artifact entries are
    /// garbage-collected lazily on the next real range scan"). Only reclaims
    /// stale entries when `kind` is `Real`.
    fn find_index(&mut self, va: u64, current: SimAsid, kind: AccessKind) -> Option<usize> {
        let mut stale = Vec::new();
        let mut hit = None;

        for (idx, slot) in self.slots.iter().enumerate() {
            if let Slot::Used(entry) = slot {
                if matches!(kind, AccessKind::Real) && entry.artifact {
                    stale.push(idx);
                    continue;
                }
                if entry.contains_va(va) && entry.matches_asid(current) {
                    hit = Some(idx);
                    break;
                }
            }
        }

        if matches!(kind, AccessKind::Real) {
            for idx in stale {
                self.free_slot(idx);
            }
        }

        hit
    }

    /// Find a live, non-stale entry covering `va` for the given ASID state.
    pub fn find(&mut self, va: u64, current: SimAsid, kind: AccessKind) -> Option<&TlbEntry> {
        let idx = self.find_index(va, current, kind)?;
        match &self.slots[idx] {
            Slot::Used(e) => Some(e),
            Slot::Free { .. } => unreachable!(),
        }
    }

    /// Record that `domain` now holds a live alias for the entry covering
    /// `va`, installed while running in `mode` (§4.2 "mapped"). A no-op if no
    /// entry covers `va` — callers only invoke this right after a hit or a
    /// fresh install, so that should not happen in practice.
    pub fn note_alias(&mut self, va: u64, current: SimAsid, mode: BaseMode, domain: DomainHandle) {
        let Some(idx) = self.find_index(va, current, AccessKind::Real) else {
            return;
        };
        if let Slot::Used(e) = &mut self.slots[idx] {
            e.mapped.set(mode);
            if !e.alias_domains.contains(&domain) {
                e.alias_domains.push(domain);
            }
        }
    }

    /// All live entries whose VA range overlaps `[lo, hi]`
    /// (`getTLBEntryForRange`/`firstTLBEntryRange`/`nextTLBEntryRange`
    /// collapsed into one pass since this crate has no external iterator
    /// cursor to preserve across calls).
    pub fn entries_in_range(&self, lo: u64, hi: u64) -> Vec<&TlbEntry> {
        self.slots
            .iter()
            .filter_map(|s| match s {
                Slot::Used(e) if e.overlaps_range(lo, hi) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Remove every live entry overlapping `lo..=hi`, filtered (when `asid`
    /// is `Some`) to only those whose full ASID-sensitive context still
    /// matches; `None` removes unconditionally on VA range alone
    /// (`deleteTLBEntryMode`'s `MM_ANY`). Used for unconditional eviction
    /// (e.g. re-walking a D=0 entry) — ASID-qualified *invalidation*
    /// (fences) goes through [`Tlb::invalidate_asid_qualified`] instead,
    /// which compares only the relevant ASID sub-field per §4.7 rather than
    /// full context equality. `on_evict` runs once per removed entry, before
    /// its slot is freed, so the caller can tear down its domain aliases
    /// (§4.2).
    pub fn invalidate_range(
        &mut self,
        lo: u64,
        hi: u64,
        asid: Option<SimAsid>,
        on_evict: &mut dyn FnMut(&TlbEntry),
    ) {
        let doomed: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, s)| match s {
                Slot::Used(e) if e.overlaps_range(lo, hi) => {
                    let matches = match asid {
                        None => true,
                        Some(target) => e.g_bit || e.matches_asid(target),
                    };
                    matches.then_some(idx)
                }
                _ => None,
            })
            .collect();

        for idx in doomed {
            if let Slot::Used(e) = &self.slots[idx] {
                on_evict(e);
            }
            self.free_slot(idx);
        }
    }

    /// ASID-qualified invalidation (§4.7 `ASID` mode): within `lo..=hi`,
    /// remove every non-global entry whose relevant ASID sub-field equals
    /// `asid_field`, unless its tagged VMID differs from `current_vmid` (in
    /// which case it is preserved regardless of the ASID match). `asid_field`
    /// should already be masked to the implemented width by the caller.
    /// `on_evict` runs once per removed entry, before its slot is freed.
    pub fn invalidate_asid_qualified(
        &mut self,
        lo: u64,
        hi: u64,
        asid_field: u16,
        current_vmid: u16,
        on_evict: &mut dyn FnMut(&TlbEntry),
    ) {
        let doomed: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, s)| match s {
                Slot::Used(e) if e.overlaps_range(lo, hi) && !e.g_bit => {
                    if e.sim_asid.vmid() != current_vmid {
                        return None;
                    }
                    let field = match e.tlb_id {
                        TlbId::Hs => e.sim_asid.asid_hs(),
                        TlbId::Vs1 => e.sim_asid.asid_vs(),
                        TlbId::Vs2 => e.sim_asid.asid_hs(),
                    };
                    (field == asid_field).then_some(idx)
                }
                _ => None,
            })
            .collect();
        for idx in doomed {
            if let Slot::Used(e) = &self.slots[idx] {
                on_evict(e);
            }
            self.free_slot(idx);
        }
    }

    /// Drop every live entry unconditionally (`invalidateAll`, and the
    /// first step of `restoreTLB`). `on_evict` runs once per removed entry,
    /// before its slot is freed.
    pub fn flush_all(&mut self, on_evict: &mut dyn FnMut(&TlbEntry)) {
        let doomed: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, s)| matches!(s, Slot::Used(_)).then_some(idx))
            .collect();
        for idx in doomed {
            if let Slot::Used(e) = &self.slots[idx] {
                on_evict(e);
            }
            self.free_slot(idx);
        }
    }

    /// Iterate live entries (for snapshotting).
    pub fn iter(&self) -> impl Iterator<Item = &TlbEntry> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Used(e) => Some(e),
            Slot::Free { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Perm;

    fn entry(low_va: u64, high_va: u64, g: bool, asid: SimAsid, mask: SimAsidMask) -> TlbEntry {
        TlbEntry {
            low_va,
            high_va,
            low_pa: low_va,
            priv_mask: Perm::RWX,
            u_bit: false,
            g_bit: g,
            a_bit: true,
            d_bit: true,
            tlb_id: TlbId::Hs,
            mapped: MappedMask::NONE,
            sim_asid: asid,
            asid_mask: mask,
            alias_domains: Vec::new(),
            artifact: false,
        }
    }

    #[test]
    fn insert_and_find_hit() {
        let mut tlb = Tlb::new();
        let asid = SimAsid(0);
        let mask = SimAsidMask::for_entry(TlbId::Hs, true, false, false, false);
        tlb.insert(entry(0x1000, 0x1FFF, true, asid, mask), AccessKind::Real);
        let hit = tlb.find(0x1500, asid, AccessKind::Real);
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().translate(0x1500), 0x1500);
    }

    #[test]
    fn find_misses_outside_range() {
        let mut tlb = Tlb::new();
        let asid = SimAsid(0);
        let mask = SimAsidMask::for_entry(TlbId::Hs, true, false, false, false);
        tlb.insert(entry(0x1000, 0x1FFF, true, asid, mask), AccessKind::Real);
        assert!(tlb.find(0x2000, asid, AccessKind::Real).is_none());
    }

    #[test]
    fn artifact_entry_invisible_and_reclaimed_on_real_scan() {
        let mut tlb = Tlb::new();
        let asid = SimAsid(0);
        let mask = SimAsidMask::for_entry(TlbId::Hs, true, false, false, false);
        tlb.insert(
            entry(0x1000, 0x1FFF, true, asid, mask),
            AccessKind::Artifact,
        );
        assert!(tlb.find(0x1500, asid, AccessKind::Real).is_none());
        assert_eq!(tlb.len(), 0);
    }

    #[test]
    fn invalidate_range_respects_asid_unless_global() {
        let mut tlb = Tlb::new();
        let mask = SimAsidMask::for_entry(TlbId::Hs, false, false, false, false);
        let asid_a = SimAsid(1);
        let asid_b = SimAsid(2);
        tlb.insert(
            entry(0x1000, 0x1FFF, false, asid_a, mask),
            AccessKind::Real,
        );
        tlb.invalidate_range(0x1000, 0x1FFF, Some(asid_b), &mut |_| {});
        assert_eq!(tlb.len(), 1);
        tlb.invalidate_range(0x1000, 0x1FFF, Some(asid_a), &mut |_| {});
        assert_eq!(tlb.len(), 0);
    }

    #[test]
    fn free_slots_are_reused() {
        let mut tlb = Tlb::new();
        let asid = SimAsid(0);
        let mask = SimAsidMask::for_entry(TlbId::Hs, true, false, false, false);
        tlb.insert(entry(0x1000, 0x1FFF, true, asid, mask), AccessKind::Real);
        tlb.flush_all(&mut |_| {});
        assert_eq!(tlb.len(), 0);
        tlb.insert(entry(0x2000, 0x2FFF, true, asid, mask), AccessKind::Real);
        assert_eq!(tlb.slots.len(), 1, "reinsert should reuse the freed slot");
    }
}
