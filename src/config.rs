// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Build-time configuration and capacity limits of the power domain arena.

/// True if the build is configured with debug assertions on.
pub const DEBUG: bool = cfg!(debug_assertions);

/// Highest affinity level the engine can represent. Level 0 is the CPU, level 3 is usually the
/// system.
pub const MAX_POWER_LEVEL_LIMIT: usize = 3;

/// Number of slots needed to store one local state per affinity level.
pub const POWER_LEVEL_COUNT_LIMIT: usize = MAX_POWER_LEVEL_LIMIT + 1;

/// Maximum number of CPUs a platform topology may contain.
///
/// Can be overridden with the `PSCI_MAX_CORE_COUNT` environment variable at build time.
pub const MAX_CORE_COUNT: usize = parse_usize(option_env!("PSCI_MAX_CORE_COUNT"), 64);

/// Maximum number of power domains above the CPU level (clusters, SoCs, system).
///
/// Can be overridden with the `PSCI_MAX_NON_CPU_DOMAINS` environment variable at build time.
pub const MAX_NON_CPU_DOMAINS: usize = parse_usize(option_env!("PSCI_MAX_NON_CPU_DOMAINS"), 32);

/// Maximum number of distinct local power states tracked per domain by the statistics module.
pub const MAX_STAT_STATES: usize = 8;

/// Parses a decimal number from a build-time environment variable, falling back to `default` if
/// it is absent or not a valid non-zero number.
const fn parse_usize(value: Option<&str>, default: usize) -> usize {
    let bytes = match value {
        Some(value) => value.as_bytes(),
        None => return default,
    };
    if bytes.is_empty() {
        return default;
    }

    let mut result: usize = 0;
    let mut i = 0;
    while i < bytes.len() {
        let digit = bytes[i];
        if !digit.is_ascii_digit() {
            return default;
        }
        result = match result.checked_mul(10) {
            Some(value) => match value.checked_add((digit - b'0') as usize) {
                Some(value) => value,
                None => return default,
            },
            None => return default,
        };
        i += 1;
    }

    if result == 0 { default } else { result }
}
