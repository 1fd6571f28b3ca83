// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reconciler configuration.

use crate::time::Duration;

/// Tunables for a [`Reconciler`](crate::reconciler::Reconciler).
///
/// The defaults match the limits and timeouts that interactive hosts expect;
/// tests usually start from [`ReconcilerConfig::eager`] so fallbacks commit
/// without waiting on the clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Synchronous re-commits of one root in a row before
    /// [`ReconcileError::MaxUpdateDepth`](crate::error::ReconcileError::MaxUpdateDepth).
    pub nested_update_limit: u32,
    /// Passive flushes in a row that schedule updates on the same root before
    /// [`ReconcileError::MaxPassiveUpdateDepth`](crate::error::ReconcileError::MaxPassiveUpdateDepth).
    pub nested_passive_update_limit: u32,
    /// Starvation timeout for sync and continuous-input lanes.
    pub sync_expiration: Duration,
    /// Starvation timeout for default and transition lanes.
    pub default_expiration: Duration,
    /// Window after a fallback commit in which a ping restarts a suspended
    /// retry render instead of letting it finish.
    pub fallback_throttle: Duration,
    /// Computed commit delays at or below this commit immediately.
    pub min_suspend_timeout: Duration,
    /// Commit suspended trees immediately instead of throttling fallbacks.
    pub force_flush_fallbacks: bool,
}

impl ReconcilerConfig {
    /// Default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nested_update_limit: 50,
            nested_passive_update_limit: 50,
            sync_expiration: Duration(250),
            default_expiration: Duration(5000),
            fallback_throttle: Duration(500),
            min_suspend_timeout: Duration(10),
            force_flush_fallbacks: false,
        }
    }

    /// Default configuration with fallback throttling disabled.
    #[must_use]
    pub const fn eager() -> Self {
        Self {
            force_flush_fallbacks: true,
            ..Self::new()
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eager_only_changes_fallback_flushing() {
        let eager = ReconcilerConfig::eager();
        assert!(eager.force_flush_fallbacks);
        assert_eq!(
            ReconcilerConfig {
                force_flush_fallbacks: false,
                ..eager
            },
            ReconcilerConfig::new()
        );
    }
}
