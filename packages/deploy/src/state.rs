// ABOUTME: Per-service provisioning state machine
// ABOUTME: Encodes the legal transitions from Pending through Running, with Failed reachable from any live state

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisioningState {
    Pending,
    ContainerExisting,
    ContainerCreating,
    ContainerStarting,
    WaitingReady,
    BootstrappingRuntime,
    UploadingDescriptor,
    StartingWorkload,
    Running,
    Failed,
}

impl ProvisioningState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProvisioningState::Running | ProvisioningState::Failed)
    }

    pub fn can_transition_to(self, next: ProvisioningState) -> bool {
        use ProvisioningState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }

        matches!(
            (self, next),
            (Pending, ContainerExisting)
                | (Pending, ContainerCreating)
                | (ContainerExisting, ContainerStarting)
                | (ContainerExisting, WaitingReady)
                | (ContainerCreating, ContainerStarting)
                | (ContainerStarting, WaitingReady)
                | (WaitingReady, BootstrappingRuntime)
                | (BootstrappingRuntime, UploadingDescriptor)
                | (UploadingDescriptor, StartingWorkload)
                | (StartingWorkload, Running)
        )
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProvisioningState::Pending => "pending",
            ProvisioningState::ContainerExisting => "container exists",
            ProvisioningState::ContainerCreating => "creating container",
            ProvisioningState::ContainerStarting => "starting container",
            ProvisioningState::WaitingReady => "waiting for container",
            ProvisioningState::BootstrappingRuntime => "installing runtime",
            ProvisioningState::UploadingDescriptor => "uploading compose file",
            ProvisioningState::StartingWorkload => "starting workload",
            ProvisioningState::Running => "running",
            ProvisioningState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Illegal provisioning transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: ProvisioningState,
    pub to: ProvisioningState,
}

/// Tracks one service's current state and the time each state was entered
#[derive(Debug, Clone)]
pub struct ProvisioningTracker {
    current: ProvisioningState,
    history: Vec<(ProvisioningState, Instant)>,
}

impl Default for ProvisioningTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisioningTracker {
    pub fn new() -> Self {
        Self {
            current: ProvisioningState::Pending,
            history: vec![(ProvisioningState::Pending, Instant::now())],
        }
    }

    pub fn current(&self) -> ProvisioningState {
        self.current
    }

    pub fn advance(&mut self, next: ProvisioningState) -> Result<(), InvalidTransition> {
        if !self.current.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        self.current = next;
        self.history.push((next, Instant::now()));
        Ok(())
    }

    /// Visited states in order
    pub fn path(&self) -> Vec<ProvisioningState> {
        self.history.iter().map(|(s, _)| *s).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProvisioningState::*;

    #[test]
    fn test_happy_path_is_legal() {
        let mut tracker = ProvisioningTracker::new();
        for next in [
            ContainerCreating,
            ContainerStarting,
            WaitingReady,
            BootstrappingRuntime,
            UploadingDescriptor,
            StartingWorkload,
            Running,
        ] {
            tracker.advance(next).unwrap();
        }
        assert_eq!(tracker.current(), Running);
        assert_eq!(tracker.path().len(), 8);
    }

    #[test]
    fn test_existing_container_paths() {
        assert!(Pending.can_transition_to(ContainerExisting));
        assert!(ContainerExisting.can_transition_to(WaitingReady));
        assert!(ContainerExisting.can_transition_to(ContainerStarting));
        assert!(!ContainerExisting.can_transition_to(ContainerCreating));
    }

    #[test]
    fn test_failed_reachable_from_every_live_state() {
        for state in [
            Pending,
            ContainerExisting,
            ContainerCreating,
            ContainerStarting,
            WaitingReady,
            BootstrappingRuntime,
            UploadingDescriptor,
            StartingWorkload,
        ] {
            assert!(state.can_transition_to(Failed), "{:?}", state);
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert!(!Running.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));

        let mut tracker = ProvisioningTracker::new();
        tracker.advance(Failed).unwrap();
        assert_eq!(
            tracker.advance(ContainerCreating),
            Err(InvalidTransition {
                from: Failed,
                to: ContainerCreating
            })
        );
    }

    #[test]
    fn test_skipping_steps_is_rejected() {
        assert!(!Pending.can_transition_to(WaitingReady));
        assert!(!WaitingReady.can_transition_to(StartingWorkload));
    }
}
