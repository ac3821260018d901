use std::fmt;

use bytes::Bytes;
use thiserror::Error;

use crate::signaling::{
    decode, encode, ConnectError, DecodeError, SdpType, SendError, SessionDescription,
    WireEnvelope,
};

use super::negotiator::NegotiationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("signaling channel closed before an answer arrived")]
    Closed,
}

/// Why a negotiation ended in [`NegotiationState::Failed`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Failure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    Offering,
    AwaitingGatherComplete,
    OfferPublished,
    AwaitingAnswer,
    /// An answer was accepted and is being applied. Further messages are not
    /// treated as answers.
    ApplyingAnswer,
    Connected,
    Failed(Failure),
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Connected | Self::Failed(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Offering => f.write_str("offering"),
            Self::AwaitingGatherComplete => f.write_str("awaiting ICE gathering"),
            Self::OfferPublished => f.write_str("offer published"),
            Self::AwaitingAnswer => f.write_str("awaiting answer"),
            Self::ApplyingAnswer => f.write_str("applying answer"),
            Self::Connected => f.write_str("connected"),
            Self::Failed(failure) => write!(f, "failed: {}", failure),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Start,
    OfferCreated(SessionDescription),
    LocalDescriptionReady(SessionDescription),
    OfferSent,
    MessageReceived(Bytes),
    RemoteDescriptionApplied,
    Fail(Failure),
}

/// Side effects requested by [`step`]. The driver performs them and feeds the
/// outcome back as an [`Event`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    CreateOffer,
    AwaitLocalDescription,
    Publish(WireEnvelope),
    AwaitAnswer,
    ApplyRemoteDescription(SessionDescription),
    /// A message arrived after the answer was applied; its length is reported.
    DiscardMessage(usize),
}

fn accept_answer(msg: Bytes) -> Result<SessionDescription, Failure> {
    let desc = decode(&WireEnvelope::from_bytes(msg)?)?;
    if desc.sdp_type() != SdpType::Answer {
        return Err(NegotiationError::MalformedDescription(format!(
            "expected an answer, got an {}",
            desc.sdp_type()
        ))
        .into());
    }
    Ok(desc)
}

pub fn step(state: NegotiationState, event: Event) -> (NegotiationState, Option<Action>) {
    use NegotiationState as S;

    match (state, event) {
        (state @ S::Failed(_), _) => (state, None),
        (S::Connected, Event::MessageReceived(msg)) => {
            (S::Connected, Some(Action::DiscardMessage(msg.len())))
        }
        (S::Connected, _) => (S::Connected, None),
        (_, Event::Fail(failure)) => (S::Failed(failure), None),

        (S::Idle, Event::Start) => (S::Offering, Some(Action::CreateOffer)),
        (S::Offering, Event::OfferCreated(_)) => (
            S::AwaitingGatherComplete,
            Some(Action::AwaitLocalDescription),
        ),
        (S::AwaitingGatherComplete, Event::LocalDescriptionReady(desc)) => {
            (S::OfferPublished, Some(Action::Publish(encode(&desc))))
        }
        (S::OfferPublished, Event::OfferSent) => (S::AwaitingAnswer, Some(Action::AwaitAnswer)),
        (S::AwaitingAnswer, Event::MessageReceived(msg)) => match accept_answer(msg) {
            Ok(desc) => (S::ApplyingAnswer, Some(Action::ApplyRemoteDescription(desc))),
            Err(failure) => (S::Failed(failure), None),
        },
        (S::ApplyingAnswer, Event::RemoteDescriptionApplied) => (S::Connected, None),

        (state, _) => (state, None),
    }
}
