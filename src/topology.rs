// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Static shape of the power domain tree.
//!
//! The platform describes the tree as a list of child counts in breadth-first order. The layout
//! built from it is immutable, so it can be read by any CPU without locking.

use crate::{
    config::{MAX_CORE_COUNT, MAX_NON_CPU_DOMAINS, MAX_POWER_LEVEL_LIMIT},
    error::{PsciError, TopologyError, fatal},
};
use arm_psci::Mpidr;
use arrayvec::ArrayVec;
use core::ops::Range;

/// Affinity level of the CPU power domains.
pub const CPU_POWER_LEVEL: usize = 0;

/// Largest number of children which can be told apart by an MPIDR affinity field.
const MAX_CHILD_COUNT: usize = 256;

/// Layout of a power domain above the CPU level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainLayout {
    /// Affinity level of the domain.
    pub level: usize,
    /// Index of the parent domain, `None` for the top level domains.
    pub parent: Option<usize>,
    /// Indices of the CPUs in the domain.
    pub cpu_range: Range<usize>,
    /// Position among the children of the parent, used as the affinity field of the MPIDR.
    affinity: u8,
}

/// Layout of a CPU power domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuLayout {
    /// Index of the level 1 domain containing the CPU.
    pub parent: usize,
    /// MPIDR of the CPU.
    pub mpidr: Mpidr,
}

/// Power domain tree layout built from the platform descriptor.
#[derive(Debug)]
pub struct Topology {
    max_level: usize,
    domains: ArrayVec<DomainLayout, MAX_NON_CPU_DOMAINS>,
    cpus: ArrayVec<CpuLayout, MAX_CORE_COUNT>,
    /// Packed affinity value and CPU index pairs sorted by affinity.
    cpus_by_affinity: ArrayVec<(u32, usize), MAX_CORE_COUNT>,
}

impl Topology {
    /// Builds the layout. A malformed descriptor is a fatal error.
    pub fn new(descriptor: &[usize], core_count: usize, max_level: usize) -> Self {
        match Self::try_new(descriptor, core_count, max_level) {
            Ok(topology) => topology,
            Err(error) => fatal(error.into()),
        }
    }

    /// Builds the layout, reporting malformed descriptors as errors.
    pub fn try_new(
        descriptor: &[usize],
        core_count: usize,
        max_level: usize,
    ) -> Result<Self, TopologyError> {
        if max_level == CPU_POWER_LEVEL || max_level > MAX_POWER_LEVEL_LIMIT {
            return Err(TopologyError::UnsupportedPowerLevel(max_level));
        }

        let mut entries = descriptor.iter().copied();
        let mut next_child_count = |level| {
            let count = entries.next().ok_or(TopologyError::DescriptorTooShort)?;
            if count == 0 {
                Err(TopologyError::EmptyDomain { level })
            } else if count > MAX_CHILD_COUNT {
                Err(TopologyError::TooManyChildren(count))
            } else {
                Ok(count)
            }
        };

        let mut domains = ArrayVec::new();
        for affinity in 0..next_child_count(max_level)? {
            push_domain(&mut domains, max_level, None, affinity)?;
        }

        // Indices of the domains at the level above the one being populated.
        let mut parents = 0..domains.len();
        for level in (CPU_POWER_LEVEL + 1..max_level).rev() {
            let first = domains.len();
            for parent in parents {
                for affinity in 0..next_child_count(level)? {
                    push_domain(&mut domains, level, Some(parent), affinity)?;
                }
            }
            parents = first..domains.len();
        }

        let mut cpus: ArrayVec<CpuLayout, MAX_CORE_COUNT> = ArrayVec::new();
        for parent in parents {
            for affinity in 0..next_child_count(CPU_POWER_LEVEL)? {
                let cpu_index = cpus.len();
                let mut affinities = [0u8; MAX_POWER_LEVEL_LIMIT + 1];
                affinities[CPU_POWER_LEVEL] = affinity as u8;

                let mut node = Some(parent);
                while let Some(index) = node {
                    let domain = &mut domains[index];
                    if domain.cpu_range.is_empty() {
                        domain.cpu_range = cpu_index..cpu_index + 1;
                    } else {
                        debug_assert_eq!(domain.cpu_range.end, cpu_index);
                        domain.cpu_range.end += 1;
                    }
                    affinities[domain.level] = domain.affinity;
                    node = domain.parent;
                }

                let mpidr = Mpidr {
                    aff0: affinities[0],
                    aff1: affinities[1],
                    aff2: affinities[2],
                    aff3: Some(affinities[3]),
                };
                cpus.try_push(CpuLayout { parent, mpidr })
                    .map_err(|_| TopologyError::CapacityExceeded)?;
            }
        }

        let unused = entries.count();
        if unused != 0 {
            return Err(TopologyError::TrailingEntries(unused));
        }

        if cpus.len() != core_count {
            return Err(TopologyError::CoreCountMismatch {
                expected: core_count,
                found: cpus.len(),
            });
        }

        let mut cpus_by_affinity: ArrayVec<(u32, usize), MAX_CORE_COUNT> = cpus
            .iter()
            .enumerate()
            .map(|(index, cpu)| (affinity_key(cpu.mpidr), index))
            .collect();
        cpus_by_affinity.sort_unstable_by_key(|&(key, _)| key);

        Ok(Self {
            max_level,
            domains,
            cpus,
            cpus_by_affinity,
        })
    }

    /// Returns the highest affinity level.
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Returns the number of CPUs.
    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    /// Returns the number of power domains above the CPU level.
    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    /// Returns the layout of a non-CPU domain.
    pub fn domain(&self, index: usize) -> &DomainLayout {
        &self.domains[index]
    }

    /// Returns the layout of a CPU.
    pub fn cpu(&self, cpu_index: usize) -> &CpuLayout {
        &self.cpus[cpu_index]
    }

    /// Translates an MPIDR into the linear index of the CPU.
    pub fn core_position(&self, mpidr: Mpidr) -> Result<usize, PsciError> {
        let key = affinity_key(mpidr);
        self.cpus_by_affinity
            .binary_search_by_key(&key, |&(key, _)| key)
            .map(|position| self.cpus_by_affinity[position].1)
            .map_err(|_| PsciError::NotPresent)
    }
}

fn push_domain(
    domains: &mut ArrayVec<DomainLayout, MAX_NON_CPU_DOMAINS>,
    level: usize,
    parent: Option<usize>,
    affinity: usize,
) -> Result<(), TopologyError> {
    domains
        .try_push(DomainLayout {
            level,
            parent,
            cpu_range: 0..0,
            affinity: affinity as u8,
        })
        .map_err(|_| TopologyError::CapacityExceeded)
}

/// Packs the affinity fields of an MPIDR into a single comparable value.
fn affinity_key(mpidr: Mpidr) -> u32 {
    (u32::from(mpidr.aff3.unwrap_or(0)) << 24)
        | (u32::from(mpidr.aff2) << 16)
        | (u32::from(mpidr.aff1) << 8)
        | u32::from(mpidr.aff0)
}
