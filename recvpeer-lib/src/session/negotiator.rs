mod rtc_negotiator;

use std::fmt;

use async_trait::async_trait;
use derive_new::new;
use getset::Getters;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::signaling::SessionDescription;

pub use self::rtc_negotiator::RtcNegotiator;
#[cfg(test)]
pub(crate) use self::rtc_negotiator::create_peer_connection;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Audio => "audio",
            Self::Video => "video",
        })
    }
}

/// Media lines requested by the local offer. Every line is receive-only;
/// nothing is ever sent.
pub const REQUESTED_TRANSCEIVERS: [MediaKind; 3] =
    [MediaKind::Audio, MediaKind::Video, MediaKind::Video];

/// Progress of ICE candidate gathering. Only ever moves forward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum IceGatheringState {
    #[default]
    New,
    Gathering,
    Complete,
}

impl IceGatheringState {
    pub fn advance(self, next: Self) -> Self {
        self.max(next)
    }

    pub fn is_complete(&self) -> bool {
        *self == Self::Complete
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// The peer connection will not carry media any more.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Getters, new)]
pub struct TrackDescriptor {
    #[getset(get = "pub")]
    kind: MediaKind,
    #[getset(get = "pub")]
    id: String,
    #[getset(get = "pub")]
    stream_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    ConnectionStateChanged(ConnectionState),
    TrackReceived(TrackDescriptor),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStage {
    IceGathering,
    Answer,
}

impl fmt::Display for WaitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IceGathering => "ICE candidate gathering",
            Self::Answer => "the remote answer",
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("peer connection is unavailable: {0}")]
    TransportUnavailable(String),
    #[error("remote session description was rejected: {0}")]
    MalformedDescription(String),
    #[error("timed out waiting for {0}")]
    Timeout(WaitStage),
}

/// The negotiation half of a peer connection.
#[async_trait]
pub trait SessionNegotiator: Send {
    /// Creates the receive-only offer described by [`REQUESTED_TRANSCEIVERS`]
    /// and applies it as the local description, which starts ICE gathering.
    async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError>;

    /// Waits for ICE gathering to complete and returns the local description
    /// including every gathered candidate.
    async fn await_local_description_ready(
        &mut self,
    ) -> Result<SessionDescription, NegotiationError>;

    async fn apply_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError>;

    fn ice_gathering_state(&self) -> IceGatheringState;

    fn subscribe(&self) -> broadcast::Receiver<PeerEvent>;

    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gathering_state_is_monotonic() {
        let state = IceGatheringState::New.advance(IceGatheringState::Gathering);
        assert_eq!(state, IceGatheringState::Gathering);
        let state = state.advance(IceGatheringState::Complete);
        assert!(state.is_complete());
        assert_eq!(
            state.advance(IceGatheringState::Gathering),
            IceGatheringState::Complete
        );
        assert_eq!(state.advance(IceGatheringState::New), IceGatheringState::Complete);
    }

    #[test]
    fn test_requested_transceivers() {
        let audio = REQUESTED_TRANSCEIVERS
            .iter()
            .filter(|kind| **kind == MediaKind::Audio)
            .count();
        let video = REQUESTED_TRANSCEIVERS
            .iter()
            .filter(|kind| **kind == MediaKind::Video)
            .count();
        assert_eq!((audio, video), (1, 2));
    }

    #[test]
    fn test_timeout_is_readable() {
        assert_eq!(
            NegotiationError::Timeout(WaitStage::IceGathering).to_string(),
            "timed out waiting for ICE candidate gathering"
        );
    }
}
