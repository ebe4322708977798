#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("broadcast hub is closed")]
    Closed,

    #[error("channel name must not be empty")]
    EmptyChannel,
}

impl BroadcastError {
    /// Convert to BackendError for the `BroadcastBus` boundary.
    ///
    /// `Closed` → Io kind (bus unreachable).
    /// `EmptyChannel` → Logic kind.
    pub fn into_backend_error(self) -> pixel_api::BackendError {
        match self {
            BroadcastError::Closed => pixel_api::BackendError::io(self.to_string()),
            BroadcastError::EmptyChannel => pixel_api::BackendError::new(self.to_string()),
        }
    }
}
