/// Sync Coordinator client state (§4.4). `Error` carries a short diagnostic and is only left
/// by resetting the local store and re-entering `Hydrating`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Hydrating,
    CatchingUp,
    Live,
    Error(String),
}

impl ClientState {
    pub fn is_live(&self) -> bool {
        matches!(self, ClientState::Live)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ClientState::Error(_))
    }
}
