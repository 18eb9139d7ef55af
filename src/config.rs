//! Core configuration.
//!
//! The reference implementation reads most of these as per-core constants
//! baked in from the processor configuration table at model-build time
//! (`riscvConfig`). This crate collects the handful that the translation/PMP
//! pipeline actually consults into one plain struct passed to
//! [`crate::orchestrator::VmCore::new`], rather than threading a dozen
//! booleans through every call.
#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    /// Number of implemented PMP regions (0..=64).
    pub pmp_regions: u32,
    /// PMP grain `G` (§3: controls NA4 selectability and low-bit masking).
    pub pmp_grain: u32,
    /// Number of implemented bits in `satp.ASID` / `vsatp.ASID`. Zero means
    /// ASIDs are not implemented and every entry behaves as global
    /// (§4.7).
    pub asid_bits: u32,
    /// Number of implemented bits in `hgatp.VMID`.
    pub vmid_bits: u32,
    /// Whether the hart manages A/D bits in hardware (§4.3 step 8) rather
    /// than requiring software to set them via a page fault.
    pub hardware_ad: bool,
    /// Whether the hypervisor extension (and hence VS1/VS2 and the Sv*×4
    /// modes) is present at all.
    pub hypervisor_extension: bool,
    /// Whether the running privileged-architecture version is >= 1.11,
    /// which changes S-mode-fetch-of-U-page denial under SUM (§4.4; §9
    /// open-question resolution in the expanded spec).
    pub priv_version_ge_1_11: bool,
    /// Host-enforced maximum alias span installed into the domain layer in
    /// one call (§4.1 "Virtual range cap").
    pub max_alias_span: u64,
}

impl Default for CoreConfig {
    /// A generic rv64gc-class core: 16 PMP regions, no grain, 9-bit ASID,
    /// 14-bit VMID, hardware A/D, hypervisor extension present, priv-spec
    /// >= 1.11, 4 GiB alias cap.
    fn default() -> Self {
        CoreConfig {
            pmp_regions: 16,
            pmp_grain: 0,
            asid_bits: 9,
            vmid_bits: 14,
            hardware_ad: true,
            hypervisor_extension: true,
            priv_version_ge_1_11: true,
            max_alias_span: 4 * 1024 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let cfg = CoreConfig::default();
        assert!(cfg.pmp_regions > 0);
        assert!(cfg.asid_bits > 0);
    }
}
