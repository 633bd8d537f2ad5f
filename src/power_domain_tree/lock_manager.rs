// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Ordered locking of the power domain nodes.
//!
//! A [`LockedPath`] is the only way to reach the nodes of a [`PowerDomainTree`]. It locks the CPU
//! node first and then its ancestors one level after the other, and releases them in the reverse
//! order when dropped. Every CPU walking the tree in the same direction means no lock cycle can
//! form.

use super::{CpuPowerNode, NonCpuPowerNode, PowerDomainTree};
use crate::{config::MAX_POWER_LEVEL_LIMIT, topology::CPU_POWER_LEVEL};
use arrayvec::ArrayVec;
use spin::mutex::SpinMutexGuard;

/// Lock operation on a power domain node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    /// The node at `level` with `index` in the arena of that level has been locked.
    Acquire {
        /// Affinity level of the node.
        level: usize,
        /// Index of the node, CPU index at the CPU level.
        index: usize,
    },
    /// The node has been unlocked.
    Release {
        /// Affinity level of the node.
        level: usize,
        /// Index of the node, CPU index at the CPU level.
        index: usize,
    },
}

/// A CPU node and its locked ancestors up to some level.
pub struct LockedPath<'a, S> {
    tree: &'a PowerDomainTree<S>,
    cpu_index: usize,
    cpu: SpinMutexGuard<'a, CpuPowerNode<S>>,
    ancestors: ArrayVec<SpinMutexGuard<'a, NonCpuPowerNode<S>>, MAX_POWER_LEVEL_LIMIT>,
}

impl<S> PowerDomainTree<S> {
    /// Locks the CPU node and its ancestors up to `up_to_level`, lowest level first.
    ///
    /// The calling CPU must not hold any other path of the tree.
    pub fn acquire_path(&self, cpu_index: usize, up_to_level: usize) -> LockedPath<'_, S> {
        let cpu = self.cpu_power_nodes[cpu_index].lock();
        trace::record(LockEvent::Acquire {
            level: CPU_POWER_LEVEL,
            index: cpu_index,
        });

        let mut path = LockedPath {
            tree: self,
            cpu_index,
            cpu,
            ancestors: ArrayVec::new(),
        };
        path.extend_to(up_to_level);
        path
    }

    /// Unlocks the path, highest level first. Same as dropping it.
    pub fn release_path(&self, path: LockedPath<'_, S>) {
        drop(path);
    }
}

impl<S> LockedPath<'_, S> {
    /// Locks further ancestors of the CPU until `up_to_level` is reached or the top of the tree.
    pub fn extend_to(&mut self, up_to_level: usize) {
        loop {
            let next = match self.ancestors.last() {
                Some(node) => node.parent,
                None => Some(self.cpu.parent),
            };
            let Some(index) = next else {
                break;
            };

            let level = self.ancestors.len() + 1;
            if level > up_to_level {
                break;
            }

            let node = self.tree.non_cpu_power_nodes[index].lock();
            debug_assert_eq!(node.level, level);
            trace::record(LockEvent::Acquire { level, index });
            self.ancestors.push(node);
        }
    }

    /// Index of the CPU at the bottom of the path.
    pub fn cpu_index(&self) -> usize {
        self.cpu_index
    }

    /// Highest locked level.
    pub fn max_level(&self) -> usize {
        self.ancestors.len()
    }

    /// The locked CPU node.
    pub fn cpu(&self) -> &CpuPowerNode<S> {
        &self.cpu
    }

    /// The locked CPU node.
    pub fn cpu_mut(&mut self) -> &mut CpuPowerNode<S> {
        &mut self.cpu
    }

    /// Create immutable iterator of the ancestors starting from the lowest level.
    pub fn ancestors(&self) -> impl DoubleEndedIterator<Item = &NonCpuPowerNode<S>> {
        self.ancestors.iter().map(|guard| &**guard)
    }

    /// Create mutable iterator of the ancestors starting from the lowest level.
    pub fn ancestors_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut NonCpuPowerNode<S>> {
        self.ancestors.iter_mut().map(|guard| &mut **guard)
    }

    /// Returns the locked ancestor at `level`.
    ///
    /// Panics if `level` is the CPU level or above the locked levels.
    pub fn ancestor(&self, level: usize) -> &NonCpuPowerNode<S> {
        &self.ancestors[level - 1]
    }

    /// Returns the locked ancestor at `level`.
    ///
    /// Panics if `level` is the CPU level or above the locked levels.
    pub fn ancestor_mut(&mut self, level: usize) -> &mut NonCpuPowerNode<S> {
        &mut self.ancestors[level - 1]
    }
}

impl<S> Drop for LockedPath<'_, S> {
    fn drop(&mut self) {
        while let Some(node) = self.ancestors.pop() {
            let event = LockEvent::Release {
                level: node.level,
                index: node.index,
            };
            drop(node);
            trace::record(event);
        }
        // The CPU guard itself is dropped right after this function returns.
        trace::record(LockEvent::Release {
            level: CPU_POWER_LEVEL,
            index: self.cpu_index,
        });
    }
}

#[cfg(not(test))]
mod trace {
    use super::LockEvent;

    #[inline(always)]
    pub fn record(_event: LockEvent) {}
}
