//! Architectural exception taxonomy and host-domain-layer error types.
//!
//! Two distinct hierarchies are kept separate, mirroring how the grounding
//! hart core separates its wire-visible `Trap` enum from the lower-level
//! `MemoryError` raised by its backing stores: `Trap` is what gets reported
//! to the host's exception-delivery collaborator, while `DomainError` is an
//! internal failure from the memory-domain layer that gets folded into a
//! `Trap` at the boundary (see [`crate::domain`]).

use thiserror::Error;

/// Access type an instruction was attempting when a fault occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Instruction,
    Load,
    Store,
}

/// Architectural exception raised by the translation/PMP/PMA pipeline.
///
/// Variants carry the faulting virtual (or guest-physical, for two-stage
/// faults) address. `Guest*` variants are used in place of the plain
/// page-fault variants when the fault originates from an active VS2
/// (stage-2) translation, per §7 of the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    InstructionAccessFault(u64),
    LoadAccessFault(u64),
    StoreAccessFault(u64),

    InstructionPageFault(u64),
    LoadPageFault(u64),
    StorePageFault(u64),

    InstructionGuestPageFault(u64),
    LoadGuestPageFault(u64),
    StoreGuestPageFault(u64),
}

impl std::fmt::Display for Trap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Trap {}

impl Trap {
    /// Architectural access fault for the given access type at `addr`.
    pub fn access_fault(access: AccessType, addr: u64) -> Trap {
        match access {
            AccessType::Instruction => Trap::InstructionAccessFault(addr),
            AccessType::Load => Trap::LoadAccessFault(addr),
            AccessType::Store => Trap::StoreAccessFault(addr),
        }
    }

    /// Architectural page fault for the given access type at `addr`, using
    /// the guest-page-fault flavor when `stage2` is true.
    pub fn page_fault(access: AccessType, addr: u64, stage2: bool) -> Trap {
        match (access, stage2) {
            (AccessType::Instruction, false) => Trap::InstructionPageFault(addr),
            (AccessType::Load, false) => Trap::LoadPageFault(addr),
            (AccessType::Store, false) => Trap::StorePageFault(addr),
            (AccessType::Instruction, true) => Trap::InstructionGuestPageFault(addr),
            (AccessType::Load, true) => Trap::LoadGuestPageFault(addr),
            (AccessType::Store, true) => Trap::StoreGuestPageFault(addr),
        }
    }

    /// The faulting address carried by this trap.
    pub fn faulting_address(&self) -> u64 {
        match *self {
            Trap::InstructionAccessFault(a)
            | Trap::LoadAccessFault(a)
            | Trap::StoreAccessFault(a)
            | Trap::InstructionPageFault(a)
            | Trap::LoadPageFault(a)
            | Trap::StorePageFault(a)
            | Trap::InstructionGuestPageFault(a)
            | Trap::LoadGuestPageFault(a)
            | Trap::StoreGuestPageFault(a) => a,
        }
    }
}

/// Failures from the host-provided memory-domain layer (§6).
///
/// These never reach the guest directly; the orchestrator maps them into the
/// appropriate [`Trap::access_fault`] for the access in progress.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("out-of-bounds memory-domain access at {0:#x}")]
    OutOfBounds(u64),

    #[error("no domain registered for mode/code-or-data combination")]
    NoSuchDomain,

    #[error("PMP refinement left the access footprint spanning more than one region")]
    PmpSplit,
}
