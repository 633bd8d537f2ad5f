// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Residency and usage counters for `PSCI_STAT_RESIDENCY` and `PSCI_STAT_COUNT`.

use crate::{
    config::MAX_STAT_STATES,
    platform::{PlatformPowerStateInterface, PowerStateType},
};
use arrayvec::ArrayVec;
use log::warn;

/// Usage of a single local power state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StateStats {
    /// Number of times the domain entered the state.
    pub count: u64,
    /// Total number of timestamp ticks the domain spent in the state.
    pub residency: u64,
}

/// Statistics of one power domain.
///
/// Owned by the power domain node, so it is protected by the same lock.
#[derive(Debug)]
pub struct PowerStats<S> {
    entered: Option<(S, u64)>,
    records: ArrayVec<(S, StateStats), MAX_STAT_STATES>,
}

impl<S: PlatformPowerStateInterface> PowerStats<S> {
    /// Creates empty statistics.
    pub fn new() -> Self {
        Self {
            entered: None,
            records: ArrayVec::new(),
        }
    }

    /// Records that the domain starts entering `state`.
    pub fn enter(&mut self, state: S, timestamp: u64) {
        if state.power_state_type() != PowerStateType::Run {
            self.entered = Some((state, timestamp));
        }
    }

    /// Records that the domain is running again and accounts the time spent in the low power
    /// state.
    pub fn exit(&mut self, timestamp: u64) {
        let Some((state, entered_at)) = self.entered.take() else {
            return;
        };
        let residency = timestamp.saturating_sub(entered_at);

        if let Some((_, stats)) = self.records.iter_mut().find(|(s, _)| *s == state) {
            stats.count += 1;
            stats.residency += residency;
        } else if self
            .records
            .try_push((
                state,
                StateStats {
                    count: 1,
                    residency,
                },
            ))
            .is_err()
        {
            warn!("No room for statistics of power state {state:?}");
        }
    }

    /// Returns the statistics of `state`.
    pub fn get(&self, state: S) -> StateStats {
        self.records
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, stats)| *stats)
            .unwrap_or_default()
    }
}

impl<S: PlatformPowerStateInterface> Default for PowerStats<S> {
    fn default() -> Self {
        Self::new()
    }
}
