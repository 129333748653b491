use crate::device::movement::MovementEvent;
use crate::store::gateway::ChannelKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Discovering,
    Active,
    Recovering,
    // reconnection budget exhausted; nothing is sampled until stop()
    Halted,
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            SessionState::Idle => "Idle",
            SessionState::Discovering => "Discovering",
            SessionState::Active => "Active",
            SessionState::Recovering => "Recovering",
            SessionState::Halted => "Halted",
            SessionState::Stopping => "Stopping",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChange(SessionState),
    SampleStored(ChannelKind),
    MovementDetected(MovementEvent),
}
