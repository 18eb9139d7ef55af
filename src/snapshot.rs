//! Save/restore (§6 "Save/restore").
//!
//! Grounded on the host simulator's `snapshot.rs` for the
//! versioned-envelope-plus-bincode convention, and on the reference
//! walker's `saveTLB`/`restoreTLB` for the semantics: only non-artifact
//! entries are serialized, and restore drops every live entry before
//! reinstalling from the stream.

use serde::{Deserialize, Serialize};

use crate::orchestrator::VmCore;
use crate::tlb::{AccessKind, TlbEntry, TlbId};

pub const SNAPSHOT_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
struct TlbSnapshot {
    hs: Vec<TlbEntry>,
    vs1: Vec<TlbEntry>,
    vs2: Vec<TlbEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PmpSnapshot {
    cfg: Vec<u8>,
    addr: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CoreSnapshot {
    version: String,
    tlb: TlbSnapshot,
    pmp: PmpSnapshot,
}

/// Serialize every non-artifact TLB entry across all three identities, plus
/// the PMP register file.
pub fn save(core: &VmCore) -> CoreSnapshot {
    let live = |id: TlbId| -> Vec<TlbEntry> {
        core.tlb_for_snapshot(id)
            .iter()
            .filter(|e| !e.artifact)
            .cloned()
            .collect()
    };

    let regions = core.config().pmp_regions as usize;
    let pmp = PmpSnapshot {
        cfg: (0..regions).map(|i| core.pmp_read_cfg(i)).collect(),
        addr: (0..regions).map(|i| core.pmp_read_addr(i)).collect(),
    };

    CoreSnapshot {
        version: SNAPSHOT_VERSION.to_string(),
        tlb: TlbSnapshot {
            hs: live(TlbId::Hs),
            vs1: live(TlbId::Vs1),
            vs2: live(TlbId::Vs2),
        },
        pmp,
    }
}

/// Drop every live TLB entry and PMP region, then reinstall from `snap`
/// (`restoreTLB`'s invalidate-before-restore ordering).
pub fn restore(core: &mut VmCore, snap: &CoreSnapshot) {
    if snap.version != SNAPSHOT_VERSION {
        log::warn!(
            "restoring snapshot with version {} against current version {}",
            snap.version,
            SNAPSHOT_VERSION
        );
    }

    for id in [TlbId::Hs, TlbId::Vs1, TlbId::Vs2] {
        core.invalidate_all(id);
    }
    for entry in &snap.tlb.hs {
        core.tlb_mut_for_restore(TlbId::Hs).insert(entry.clone(), AccessKind::Real);
    }
    for entry in &snap.tlb.vs1 {
        core.tlb_mut_for_restore(TlbId::Vs1).insert(entry.clone(), AccessKind::Real);
    }
    for entry in &snap.tlb.vs2 {
        core.tlb_mut_for_restore(TlbId::Vs2).insert(entry.clone(), AccessKind::Real);
    }

    core.pmp_reset();
    for (i, &cfg) in snap.pmp.cfg.iter().enumerate() {
        core.pmp_write_cfg(i, cfg);
    }
    for (i, &addr) in snap.pmp.addr.iter().enumerate() {
        core.pmp_write_addr(i, addr);
    }
}

/// Encode a snapshot with bincode for storage alongside the rest of the
/// host simulator's state.
pub fn to_bytes(snap: &CoreSnapshot) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(snap)
}

pub fn from_bytes(bytes: &[u8]) -> Result<CoreSnapshot, bincode::Error> {
    bincode::deserialize(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::domain::{DomainKind, TestDomain};
    use crate::orchestrator::DomainCatalog;

    fn fresh_core() -> VmCore {
        let mut catalog = DomainCatalog::new();
        catalog.register(Box::new(TestDomain::new()), DomainKind::Virtual);
        VmCore::new(CoreConfig::default(), catalog)
    }

    #[test]
    fn save_restore_roundtrips_through_bytes() {
        let core = fresh_core();
        let snap = save(&core);
        let bytes = to_bytes(&snap).unwrap();
        let decoded = from_bytes(&bytes).unwrap();
        assert_eq!(decoded.version, SNAPSHOT_VERSION);
    }

    #[test]
    fn restore_clears_existing_entries_first() {
        let mut core = fresh_core();
        let empty_snap = save(&core);
        core.invalidate_all(TlbId::Hs);
        restore(&mut core, &empty_snap);
        assert_eq!(core.tlb_for_snapshot(TlbId::Hs).len(), 0);
    }
}
