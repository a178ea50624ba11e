use std::fmt;

/// Connection lifecycle status.
///
/// Transitions are performed only by the session controller and the
/// handshake; the read loop and heartbeat emitter observe but never
/// mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Initializing,
    Authenticating,
    Connected,
    Reconnecting,
    LockedOut,
    Disconnected,
}

impl ConnectionStatus {
    /// Wire/display name, as carried in heartbeat payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Initializing => "INITIALIZING",
            ConnectionStatus::Authenticating => "AUTHENTICATING",
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Reconnecting => "RECONNECTING",
            ConnectionStatus::LockedOut => "LOCKED_OUT",
            ConnectionStatus::Disconnected => "DISCONNECTED",
        }
    }

    /// Whether moving to `next` is a legal lifecycle step.
    ///
    /// `DISCONNECTED` is reachable from every state except
    /// `LOCKED_OUT`. Both are terminal: a locked-out connection keeps
    /// its status through teardown so the cause of the end stays
    /// visible.
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        if next == Disconnected {
            return self != LockedOut;
        }
        matches!(
            (self, next),
            (Initializing, Authenticating)
                | (Authenticating, Connected)
                | (Authenticating, LockedOut)
                | (Connected, Reconnecting)
                | (Connected, LockedOut)
                | (Reconnecting, Authenticating)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
