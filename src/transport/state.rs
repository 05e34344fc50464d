use std::sync::atomic::{AtomicU8, Ordering};

/// Connection state of the companion-app link.
///
/// Within one connection attempt the state only moves forward:
/// Disconnected -> Connecting -> Connected, or straight back to Disconnected
/// on failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        }
    }
}

/// Lock-free cell. Written only by the link side, read from anywhere.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self(AtomicU8::new(ConnectionState::Disconnected as u8))
    }
}

impl StateCell {
    #[inline]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves to `to` only if the cell currently holds `from`.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_disconnected() {
        assert_eq!(StateCell::default().load(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_transition_requires_expected_state() {
        let cell = StateCell::default();
        assert!(!cell.transition(ConnectionState::Connecting, ConnectionState::Connected));
        assert!(cell.transition(ConnectionState::Disconnected, ConnectionState::Connecting));
        assert!(cell.transition(ConnectionState::Connecting, ConnectionState::Connected));
        assert_eq!(cell.load(), ConnectionState::Connected);
    }
}
