use serde::{Deserialize, Serialize};

/// Why an episode stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminalReason {
    /// Required delivery quota met.
    Success,
    /// Idled empty-handed in a zone for too long.
    Timeout,
    /// Entered a restricted zone under the terminating policy.
    Violation,
    /// Fell below the minimum allowed height.
    OutOfBounds,
    /// Reached the last step of the budget and ended itself.
    StepBudget,
    /// Cut off by the surrounding environment loop.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EpisodeStatus {
    #[default]
    Running,
    Terminal(TerminalReason),
}

impl EpisodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EpisodeStatus::Terminal(_))
    }
}

/// What a reward contribution was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RewardKind {
    OutOfBounds,
    EnterTruckLoadZone,
    EnterConveyorZoneWithBox,
    EnterPickupZone,
    EnterTruckZoneWithBox,
    RestrictedEntry,
    RestrictedLinger,
    HazardContact,
    LoadFromTruck,
    PlaceOnConveyor,
    GrabBox,
    CorrectTruck,
    WrongTruck,
    InvalidAction,
    Step,
    IdleInZone,
    IdleTimeout,
    Shortfall,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardEvent {
    pub kind: RewardKind,
    pub value: f32,
}

/// Per-episode counters owned by one controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeState {
    /// Episodes begun by this controller, starting at 1.
    pub index: u64,
    pub steps: u32,
    /// Down: boxes spawned from the truck. Up: boxes grabbed.
    pub boxes_taken: u32,
    /// Down: boxes placed on the conveyor. Up: boxes loaded into trucks.
    pub boxes_delivered: u32,
    pub idle_steps: u32,
    /// Down: at least one placement. Up: quota reached.
    pub has_completed_required_delivery: bool,
    pub shortfall_applied: bool,
    pub cumulative_reward: f32,
    pub status: EpisodeStatus,
}

impl EpisodeState {
    /// Zeroes counters for a fresh episode, bumping the episode index.
    pub fn restart(&mut self) {
        *self = EpisodeState {
            index: self.index + 1,
            ..EpisodeState::default()
        };
    }

    pub fn is_running(&self) -> bool {
        self.status == EpisodeStatus::Running
    }

    pub fn terminate(&mut self, reason: TerminalReason) {
        if self.is_running() {
            self.status = EpisodeStatus::Terminal(reason);
        }
    }

    /// True on the final step of a bounded budget.
    pub fn at_budget_end(&self, max_steps: u32) -> bool {
        max_steps > 0 && self.steps >= max_steps
    }
}

/// Collects the reward events of one decision step, in order.
#[derive(Debug, Clone, Default)]
pub struct RewardLedger {
    events: Vec<RewardEvent>,
}

impl RewardLedger {
    pub fn add(&mut self, kind: RewardKind, value: f32) {
        self.events.push(RewardEvent { kind, value });
    }

    pub fn total(&self) -> f32 {
        self.events.iter().map(|e| e.value).sum()
    }

    pub fn take(&mut self) -> Vec<RewardEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Result of one decision step, handed back to the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub reward: f32,
    pub events: Vec<RewardEvent>,
    pub status: EpisodeStatus,
}

impl StepReport {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Sum of the events of `kind`.
    pub fn reward_for(&self, kind: RewardKind) -> f32 {
        self.events
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.value)
            .sum()
    }

    pub fn has(&self, kind: RewardKind) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_keeps_only_the_episode_index() {
        let mut state = EpisodeState {
            index: 3,
            steps: 40,
            boxes_taken: 2,
            idle_steps: 9,
            has_completed_required_delivery: true,
            status: EpisodeStatus::Terminal(TerminalReason::Timeout),
            ..EpisodeState::default()
        };
        state.restart();
        assert_eq!(state.index, 4);
        assert_eq!(state.steps, 0);
        assert_eq!(state.boxes_taken, 0);
        assert!(!state.has_completed_required_delivery);
        assert!(state.is_running());
    }

    #[test]
    fn first_terminal_reason_wins() {
        let mut state = EpisodeState::default();
        state.terminate(TerminalReason::OutOfBounds);
        state.terminate(TerminalReason::Success);
        assert_eq!(state.status, EpisodeStatus::Terminal(TerminalReason::OutOfBounds));
    }

    #[test]
    fn budget_end_is_the_last_counted_step() {
        let mut state = EpisodeState::default();
        state.steps = 9;
        assert!(!state.at_budget_end(10));
        state.steps = 10;
        assert!(state.at_budget_end(10));
        assert!(!state.at_budget_end(0));
    }
}
