//! Privilege modes, including the virtualized (V=1) variants used when the
//! hypervisor extension is active.
//!
//! Grounded on `cpu/types.rs::Mode` in the host simulator, extended with the
//! `VU`/`VS` virtualized variants the original source tracks via a base mode
//! plus a separate `V` bit (`riscvMode` / `modeIsVirtual` in the reference
//! walker). Folding them into one enum keeps callers from forgetting to
//! check `V` alongside the base mode.

/// Effective privilege mode of the running hart, including virtualization
/// state (`V`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    User,
    Supervisor,
    Machine,
    VirtUser,
    VirtSupervisor,
}

/// Base (non-virtualized) privilege level, used to index per-mode domain
/// tables and to drive CSR access-level checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseMode {
    User,
    Supervisor,
    Machine,
}

impl Mode {
    /// Strip the virtualization bit, returning the underlying base mode.
    pub fn base(self) -> BaseMode {
        match self {
            Mode::User | Mode::VirtUser => BaseMode::User,
            Mode::Supervisor | Mode::VirtSupervisor => BaseMode::Supervisor,
            Mode::Machine => BaseMode::Machine,
        }
    }

    /// Is `V` (virtualization) set for this mode?
    pub fn is_virtual(self) -> bool {
        matches!(self, Mode::VirtUser | Mode::VirtSupervisor)
    }

    /// Construct the virtualized counterpart of a base mode; `Machine` has
    /// no virtualized counterpart and is returned unchanged (the hart can
    /// never be in virtualized M-mode).
    pub fn with_virt(base: BaseMode, v: bool) -> Mode {
        match (base, v) {
            (BaseMode::User, false) => Mode::User,
            (BaseMode::User, true) => Mode::VirtUser,
            (BaseMode::Supervisor, false) => Mode::Supervisor,
            (BaseMode::Supervisor, true) => Mode::VirtSupervisor,
            (BaseMode::Machine, _) => Mode::Machine,
        }
    }

    /// Encode privilege mode into the MPP/SPP field encoding (base mode
    /// only — the field itself carries no virtualization bit).
    pub fn to_mpp(self) -> u64 {
        match self.base() {
            BaseMode::User => 0b00,
            BaseMode::Supervisor => 0b01,
            BaseMode::Machine => 0b11,
        }
    }

    /// Decode an MPP/SPP field into a base mode (WARL: reserved encoding
    /// 0b10 coerces to Machine).
    pub fn from_mpp(bits: u64) -> BaseMode {
        match bits & 0b11 {
            0b00 => BaseMode::User,
            0b01 => BaseMode::Supervisor,
            _ => BaseMode::Machine,
        }
    }
}
