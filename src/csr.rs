//! Host processor collaborator interface.
//!
//! The reference hart core threads an opaque `riscvP` pointer through the
//! whole VM subsystem and reads CSR fields off it directly. Per the design
//! notes (§9) that native-pointer coupling is replaced here with a narrow
//! trait exposing only the CSR fields this core actually reads — it never
//! writes any of them (§6). This also gives the core a cyclic-dependency-free
//! seam for headless testing (`tests` below implement it with plain structs).

use crate::mode::Mode;

/// CSR- and mode-derived facts the translation/PMP pipeline needs from the
/// host hart. All fields are read-only from this crate's perspective.
pub trait HostProcessor {
    /// Current effective privilege mode, including virtualization (`V`).
    fn mode(&self) -> Mode;

    /// `satp` (HS-stage root pointer / mode / ASID), raw 64-bit value.
    fn satp(&self) -> u64;
    /// `vsatp` (VS-stage-1 root pointer / mode / ASID), raw 64-bit value.
    fn vsatp(&self) -> u64;
    /// `hgatp` (stage-2 root pointer / mode / VMID), raw 64-bit value.
    fn hgatp(&self) -> u64;

    /// `mstatus.MXR` (make-executable-readable, HS view).
    fn mstatus_mxr(&self) -> bool;
    /// `mstatus.SUM` (supervisor-user-memory-access, HS view).
    fn mstatus_sum(&self) -> bool;
    /// `mstatus.MPRV` (modify-privilege).
    fn mstatus_mprv(&self) -> bool;
    /// `mstatus.MPP` decoded to a base mode.
    fn mstatus_mpp(&self) -> crate::mode::BaseMode;
    /// `mstatush.MPV` (previous virtualization state under MPRV).
    fn mstatush_mpv(&self) -> bool;

    /// `vsstatus.MXR` (VS-stage view of MXR).
    fn vsstatus_mxr(&self) -> bool;
    /// `vsstatus.SUM` (VS-stage view of SUM).
    fn vsstatus_sum(&self) -> bool;

    /// Whether the hart is currently halted in debug mode.
    fn in_debug_mode(&self) -> bool;
    /// `dcsr.mprven` — whether MPRV has effect while in debug mode.
    fn dcsr_mprven(&self) -> bool;

    /// Raise an architectural exception, reporting the faulting (guest)
    /// virtual address. Side-effects `GVA`/`GPA` CSR fields on the host are
    /// the host's responsibility, driven by `trap.faulting_address()` and
    /// whatever guest-physical context the orchestrator tracked.
    fn raise_exception(&mut self, trap: crate::error::Trap);

    /// Notify the host that the composite simulated ASID has changed, so it
    /// can re-tag aliased domains (§4.7, "Bulk triggers").
    fn notify_asid_changed(&mut self, composite: u64);

    /// Re-select the current data domain after `mstatus.MPRV/MPP/MPV`
    /// changes (`vm_refresh_mprv_domain`, §6).
    fn reselect_data_domain(&mut self, mode: Mode);
}

/// Satp/vsatp/hgatp fields common to the three translation-root CSRs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtpFields {
    pub mode: u64,
    pub asid_or_vmid: u64,
    pub ppn: u64,
}

/// Decode a `satp`/`vsatp` CSR (ASID in bits 59:44, mode in bits 63:60).
pub fn decode_satp(raw: u64) -> AtpFields {
    AtpFields {
        mode: (raw >> 60) & 0xF,
        asid_or_vmid: (raw >> 44) & 0xFFFF,
        ppn: raw & ((1u64 << 44) - 1),
    }
}

/// Decode an `hgatp` CSR (VMID in bits 57:44, mode in bits 63:60, PPN has the
/// low 2 bits reserved as zero per the architecture but this core treats the
/// full 44-bit field as root PPN — callers that need Sv32x4/Sv39x4/Sv48x4 add
/// the 2-bit guest-offset separately, see [`crate::walker`]).
pub fn decode_hgatp(raw: u64) -> AtpFields {
    AtpFields {
        mode: (raw >> 60) & 0xF,
        asid_or_vmid: (raw >> 44) & 0x3FFF,
        ppn: raw & ((1u64 << 44) - 1),
    }
}
