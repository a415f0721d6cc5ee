/// Sync session state machine.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initial state: no session running.
    Idle,

    /// Acquiring the chain write lock and snapshotting the table.
    Starting,

    /// Opening one connection per reservation.
    Connecting,

    /// Channels are pulling blocks; the synchronizer counts down.
    Downloading,

    /// All slots signalled; releasing the write lock.
    Draining,

    /// Terminal: every piece of work completed and the lock was released.
    Completed,

    /// Terminal: the session reported a failure code.
    Failed,
}

impl SessionState {
    /// Check if a transition to the target state is valid.
    ///
    /// Failure is reachable from any live state; success only through the
    /// full sequence (or directly from Starting when there is no work).
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        match self {
            SessionState::Idle => matches!(target, SessionState::Starting),
            SessionState::Starting => matches!(
                target,
                SessionState::Connecting | SessionState::Completed | SessionState::Failed
            ),
            SessionState::Connecting => {
                matches!(target, SessionState::Downloading | SessionState::Failed)
            }
            SessionState::Downloading => {
                matches!(target, SessionState::Draining | SessionState::Failed)
            }
            SessionState::Draining => {
                matches!(target, SessionState::Completed | SessionState::Failed)
            }
            SessionState::Completed | SessionState::Failed => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}
