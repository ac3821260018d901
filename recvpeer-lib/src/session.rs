pub mod negotiator;
pub mod state_machine;

use std::{mem, time::Duration};

use derive_new::new;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::signaling::{
    channel::{SignalingChannel, WebSocketChannel},
    SendError, WireEnvelope,
};

pub use self::{
    negotiator::{
        ConnectionState, IceGatheringState, MediaKind, NegotiationError, PeerEvent,
        RtcNegotiator, SessionNegotiator, TrackDescriptor, WaitStage,
    },
    state_machine::{step, Action, Event, Failure, NegotiationState, TransportError},
};

/// Upper bounds for the two suspension points of a negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, new)]
pub struct Timeouts {
    pub gather: Duration,
    pub answer: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            gather: Duration::from_secs(30),
            answer: Duration::from_secs(300),
        }
    }
}

/// One negotiation cycle: a single offer published over a single signaling
/// channel, and a single answer applied.
pub struct NegotiationSession<N, C> {
    negotiator: N,
    channel: Option<C>,
    timeouts: Timeouts,
    state: NegotiationState,
    local_offer: Option<WireEnvelope>,
}

impl<N> NegotiationSession<N, WebSocketChannel>
where
    N: SessionNegotiator,
{
    /// Connects to the signaling server at `address`. If the connection
    /// cannot be established the returned session has already failed.
    pub async fn connect(address: &str, negotiator: N, timeouts: Timeouts) -> Self {
        match WebSocketChannel::connect(address).await {
            Ok(channel) => Self::new(negotiator, channel, timeouts),
            Err(err) => {
                warn!("failed to connect to {}: {}", address, err);
                Self {
                    negotiator,
                    channel: None,
                    timeouts,
                    state: NegotiationState::Failed(TransportError::Connect(err).into()),
                    local_offer: None,
                }
            }
        }
    }
}

impl<N, C> NegotiationSession<N, C>
where
    N: SessionNegotiator,
    C: SignalingChannel,
{
    pub fn new(negotiator: N, channel: C, timeouts: Timeouts) -> Self {
        Self {
            negotiator,
            channel: Some(channel),
            timeouts,
            state: NegotiationState::Idle,
            local_offer: None,
        }
    }

    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    pub fn negotiator(&self) -> &N {
        &self.negotiator
    }

    /// The offer exactly as it was published.
    pub fn local_offer(&self) -> Option<&WireEnvelope> {
        self.local_offer.as_ref()
    }

    pub fn into_parts(self) -> (N, Option<C>) {
        (self.negotiator, self.channel)
    }

    /// Runs the negotiation until it is connected or failed. Only the first
    /// call negotiates; later calls return the state reached.
    pub async fn run(&mut self) -> &NegotiationState {
        if self.state != NegotiationState::Idle {
            debug!("negotiation already ran: {}", self.state);
            return &self.state;
        }
        self.drive(Event::Start).await;
        match &self.state {
            NegotiationState::Connected => info!("negotiation completed"),
            NegotiationState::Failed(failure) => error!("negotiation failed: {}", failure),
            state => warn!("negotiation stopped in {}", state),
        }
        &self.state
    }

    /// Keeps reading the signaling channel after the answer was applied and
    /// reports anything that arrives. Returns when the channel closes.
    pub async fn drain_signaling(&mut self) {
        if self.state != NegotiationState::Connected {
            return;
        }
        loop {
            let Some(channel) = self.channel.as_mut() else {
                return;
            };
            let Some(msg) = channel.recv().await else {
                debug!("signaling channel closed");
                return;
            };
            self.drive(Event::MessageReceived(msg)).await;
        }
    }

    pub async fn close(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.close().await;
        }
        self.negotiator.close().await;
    }

    async fn drive(&mut self, event: Event) {
        let mut next_event = Some(event);
        while let Some(event) = next_event.take() {
            let state = mem::replace(&mut self.state, NegotiationState::Idle);
            let prev = state.to_string();
            let (state, action) = step(state, event);
            if state.to_string() != prev {
                debug!("{} -> {}", prev, state);
            }
            self.state = state;
            if let Some(action) = action {
                next_event = self.perform(action).await;
            }
        }
    }

    async fn perform(&mut self, action: Action) -> Option<Event> {
        trace!("perform {:?}", action);
        let timeouts = self.timeouts;
        Some(match action {
            Action::CreateOffer => match self.negotiator.create_offer().await {
                Ok(offer) => Event::OfferCreated(offer),
                Err(err) => Event::Fail(err.into()),
            },
            Action::AwaitLocalDescription => {
                let ready = self.negotiator.await_local_description_ready();
                match timeout(timeouts.gather, ready).await {
                    Ok(Ok(desc)) => Event::LocalDescriptionReady(desc),
                    Ok(Err(err)) => Event::Fail(err.into()),
                    Err(_) => Event::Fail(NegotiationError::Timeout(WaitStage::IceGathering).into()),
                }
            }
            Action::Publish(envelope) => {
                let Some(channel) = self.channel.as_mut() else {
                    return Some(Event::Fail(TransportError::Send(SendError::NotConnected).into()));
                };
                match channel.send(envelope.to_bytes()).await {
                    Ok(()) => {
                        debug!("published offer ({} bytes)", envelope.as_str().len());
                        self.local_offer = Some(envelope);
                        Event::OfferSent
                    }
                    Err(err) => Event::Fail(TransportError::Send(err).into()),
                }
            }
            Action::AwaitAnswer => {
                let Some(channel) = self.channel.as_mut() else {
                    return Some(Event::Fail(TransportError::Closed.into()));
                };
                match timeout(timeouts.answer, channel.recv()).await {
                    Ok(Some(msg)) => Event::MessageReceived(msg),
                    Ok(None) => Event::Fail(TransportError::Closed.into()),
                    Err(_) => Event::Fail(NegotiationError::Timeout(WaitStage::Answer).into()),
                }
            }
            Action::ApplyRemoteDescription(desc) => {
                match self.negotiator.apply_remote_description(desc).await {
                    Ok(()) => Event::RemoteDescriptionApplied,
                    Err(err) => Event::Fail(err.into()),
                }
            }
            Action::DiscardMessage(len) => {
                warn!(
                    "ignored a {} byte signaling message received after the answer",
                    len
                );
                return None;
            }
        })
    }
}
