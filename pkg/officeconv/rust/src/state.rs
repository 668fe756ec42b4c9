// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Never started, or fully stopped.
    Stopped,
    /// Engine is being launched for the first time.
    Starting,
    /// Engine is connected and tasks are executed.
    Running,
    /// Engine is being stopped and relaunched after a failure or recycle.
    Restarting,
    /// Shutdown in progress; no new tasks accepted.
    Stopping,
    /// Engine could not be (re)started; the worker is out of the pool.
    Failed,
}

impl EntryState {
    /// States in which submitted tasks are queued.
    pub fn accepts_tasks(self) -> bool {
        matches!(
            self,
            EntryState::Starting | EntryState::Running | EntryState::Restarting
        )
    }

    pub(crate) fn can_transition_to(self, next: EntryState) -> bool {
        use EntryState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Starting, Stopping)
                | (Running, Restarting)
                | (Running, Stopping)
                | (Restarting, Running)
                | (Restarting, Failed)
                | (Restarting, Stopping)
                | (Failed, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::Stopped => write!(f, "stopped"),
            EntryState::Starting => write!(f, "starting"),
            EntryState::Running => write!(f, "running"),
            EntryState::Restarting => write!(f, "restarting"),
            EntryState::Stopping => write!(f, "stopping"),
            EntryState::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle of the pool as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolState::Created => write!(f, "created"),
            PoolState::Running => write!(f, "running"),
            PoolState::Stopping => write!(f, "stopping"),
            PoolState::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use EntryState::*;

    #[test]
    fn test_lifecycle_path() {
        let path = [Stopped, Starting, Running, Restarting, Running, Stopping, Stopped];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_failed_only_leaves_through_stop() {
        assert!(Failed.can_transition_to(Stopping));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Starting));
        assert!(!Failed.can_transition_to(Restarting));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Stopping));
    }

    #[test]
    fn test_accepts_tasks() {
        assert!(Starting.accepts_tasks());
        assert!(Running.accepts_tasks());
        assert!(Restarting.accepts_tasks());
        assert!(!Stopped.accepts_tasks());
        assert!(!Stopping.accepts_tasks());
        assert!(!Failed.accepts_tasks());
    }

    #[test]
    fn test_display() {
        assert_eq!(Restarting.to_string(), "restarting");
        assert_eq!(PoolState::Stopping.to_string(), "stopping");
    }
}
