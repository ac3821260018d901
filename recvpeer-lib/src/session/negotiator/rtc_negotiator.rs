use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, trace, warn};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine,
        APIBuilder,
    },
    ice_transport::{
        ice_connection_state::RTCIceConnectionState, ice_gatherer_state::RTCIceGathererState,
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration,
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
        signaling_state::RTCSignalingState,
        RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::RTPCodecType, rtp_transceiver_direction::RTCRtpTransceiverDirection,
        RTCRtpTransceiverInit,
    },
};

use crate::signaling::{SdpType, SessionDescription};

use super::{
    ConnectionState, IceGatheringState, MediaKind, NegotiationError, PeerEvent,
    SessionNegotiator, TrackDescriptor, REQUESTED_TRANSCEIVERS,
};

const EVENT_CAPACITY: usize = 16;

fn create_config(stun_server: Option<&str>) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: stun_server
            .into_iter()
            .map(|url| RTCIceServer {
                urls: vec![url.to_owned()],
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

pub(crate) async fn create_peer_connection(
    stun_server: Option<&str>,
) -> Result<RTCPeerConnection, webrtc::Error> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
    APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build()
        .new_peer_connection(create_config(stun_server))
        .await
}

fn unavailable(err: webrtc::Error) -> NegotiationError {
    NegotiationError::TransportUnavailable(err.to_string())
}

fn to_connection_state(state: RTCIceConnectionState) -> Option<ConnectionState> {
    Some(match state {
        RTCIceConnectionState::New => ConnectionState::New,
        RTCIceConnectionState::Checking => ConnectionState::Checking,
        RTCIceConnectionState::Connected => ConnectionState::Connected,
        RTCIceConnectionState::Completed => ConnectionState::Completed,
        RTCIceConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCIceConnectionState::Failed => ConnectionState::Failed,
        RTCIceConnectionState::Closed => ConnectionState::Closed,
        RTCIceConnectionState::Unspecified => return None,
    })
}

fn to_gathering_state(state: RTCIceGathererState) -> Option<IceGatheringState> {
    match state {
        RTCIceGathererState::New => Some(IceGatheringState::New),
        RTCIceGathererState::Gathering => Some(IceGatheringState::Gathering),
        RTCIceGathererState::Complete => Some(IceGatheringState::Complete),
        RTCIceGathererState::Unspecified | RTCIceGathererState::Closed => None,
    }
}

fn to_media_kind(kind: RTPCodecType) -> Option<MediaKind> {
    match kind {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        RTPCodecType::Unspecified => None,
    }
}

fn to_codec_type(kind: MediaKind) -> RTPCodecType {
    match kind {
        MediaKind::Audio => RTPCodecType::Audio,
        MediaKind::Video => RTPCodecType::Video,
    }
}

fn to_session_description(
    desc: RTCSessionDescription,
) -> Result<SessionDescription, NegotiationError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        sdp_type => Err(NegotiationError::TransportUnavailable(format!(
            "unexpected local description type: {}",
            sdp_type
        ))),
    }
}

fn to_rtc_session_description(
    desc: SessionDescription,
) -> Result<RTCSessionDescription, NegotiationError> {
    let result = match desc.sdp_type() {
        SdpType::Offer => RTCSessionDescription::offer(desc.into_sdp()),
        SdpType::Answer => RTCSessionDescription::answer(desc.into_sdp()),
    };
    result.map_err(|err| NegotiationError::MalformedDescription(err.to_string()))
}

/// [`SessionNegotiator`] backed by a `webrtc` peer connection.
pub struct RtcNegotiator {
    rtc: Arc<RTCPeerConnection>,
    gathering_state_tx: Arc<watch::Sender<IceGatheringState>>,
    gather_complete_rx: Option<mpsc::Receiver<()>>,
    event_tx: broadcast::Sender<PeerEvent>,
    offered: bool,
}

impl Drop for RtcNegotiator {
    fn drop(&mut self) {
        trace!("drop negotiator");
        let rtc = self.rtc.clone();
        // NOTE: An established peer connection keeps running after drop,
        //       so close it explicitly.
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                let _ = rtc.close().await;
                trace!("peer connection closed");
            });
        }
    }
}

impl RtcNegotiator {
    pub async fn new(stun_server: Option<&str>) -> Result<Self, NegotiationError> {
        let rtc = create_peer_connection(stun_server)
            .await
            .map_err(unavailable)?;

        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let gathering_state_tx = Arc::new(watch::channel(IceGatheringState::New).0);

        {
            let event_tx = event_tx.clone();
            rtc.on_ice_connection_state_change(Box::new(move |state| {
                debug!("on_ice_connection_state_change {}", state);
                if let Some(state) = to_connection_state(state) {
                    let _ = event_tx.send(PeerEvent::ConnectionStateChanged(state));
                }
                Box::pin(async {})
            }));
        }
        {
            let gathering_state_tx = gathering_state_tx.clone();
            rtc.on_ice_gathering_state_change(Box::new(move |state| {
                trace!("on_ice_gathering_state_change {}", state);
                if let Some(next) = to_gathering_state(state) {
                    gathering_state_tx.send_modify(|current| *current = current.advance(next));
                }
                Box::pin(async {})
            }));
        }
        {
            let event_tx = event_tx.clone();
            rtc.on_track(Box::new(move |track, _receiver, _transceiver| {
                match to_media_kind(track.kind()) {
                    Some(kind) => {
                        let track = TrackDescriptor::new(kind, track.id(), track.stream_id());
                        debug!("on_track {:?}", track);
                        let _ = event_tx.send(PeerEvent::TrackReceived(track));
                    }
                    None => warn!("ignored track with unspecified kind: {}", track.id()),
                }
                Box::pin(async {})
            }));
        }

        Ok(Self {
            rtc: Arc::new(rtc),
            gathering_state_tx,
            gather_complete_rx: None,
            event_tx,
            offered: false,
        })
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.rtc.signaling_state() == RTCSignalingState::Closed {
            return Err(NegotiationError::TransportUnavailable(
                "peer connection is closed".to_owned(),
            ));
        }
        Ok(())
    }

    fn mark_gathering_complete(&self) {
        self.gathering_state_tx
            .send_modify(|current| *current = current.advance(IceGatheringState::Complete));
    }
}

#[async_trait]
impl SessionNegotiator for RtcNegotiator {
    async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        if self.offered {
            return Err(NegotiationError::TransportUnavailable(
                "an offer has already been created".to_owned(),
            ));
        }
        self.offered = true;

        for kind in REQUESTED_TRANSCEIVERS {
            self.rtc
                .add_transceiver_from_kind(
                    to_codec_type(kind),
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(unavailable)?;
        }

        let offer = self.rtc.create_offer(None).await.map_err(unavailable)?;

        let gather_complete = self.rtc.gathering_complete_promise().await;
        self.rtc
            .set_local_description(offer.clone())
            .await
            .map_err(unavailable)?;
        self.gather_complete_rx = Some(gather_complete);

        to_session_description(offer)
    }

    async fn await_local_description_ready(
        &mut self,
    ) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        if let Some(mut gather_complete) = self.gather_complete_rx.take() {
            // NOTE: Completion is signalled by dropping the sender, so `recv`
            //       yields `None` on success as well as on closure.
            let _ = gather_complete.recv().await;
            self.ensure_open()?;
            self.mark_gathering_complete();
        }
        if !self.ice_gathering_state().is_complete() {
            return Err(NegotiationError::TransportUnavailable(
                "no offer is gathering candidates".to_owned(),
            ));
        }
        let local_desc = self.rtc.local_description().await.ok_or_else(|| {
            NegotiationError::TransportUnavailable("Failed to get local description".to_owned())
        })?;
        to_session_description(local_desc)
    }

    async fn apply_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let desc = to_rtc_session_description(desc)?;
        self.rtc
            .set_remote_description(desc)
            .await
            .map_err(|err| NegotiationError::MalformedDescription(err.to_string()))
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        *self.gathering_state_tx.borrow()
    }

    fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.event_tx.subscribe()
    }

    async fn close(&mut self) {
        if let Err(err) = self.rtc.close().await {
            warn!("failed to close peer connection: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_lines(sdp: &str, prefix: &str) -> usize {
        sdp.lines().filter(|line| line.starts_with(prefix)).count()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offer_requests_three_receive_only_lines() {
        let mut negotiator = RtcNegotiator::new(None).await.unwrap();
        assert_eq!(negotiator.ice_gathering_state(), IceGatheringState::New);

        let offer = negotiator.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type(), SdpType::Offer);
        assert_eq!(count_lines(offer.sdp(), "m=audio"), 1);
        assert_eq!(count_lines(offer.sdp(), "m=video"), 2);
        assert_eq!(count_lines(offer.sdp(), "a=recvonly"), 3);
        assert_eq!(count_lines(offer.sdp(), "a=sendrecv"), 0);
        assert_eq!(count_lines(offer.sdp(), "a=sendonly"), 0);

        let local_desc = negotiator.await_local_description_ready().await.unwrap();
        assert!(negotiator.ice_gathering_state().is_complete());
        assert_eq!(local_desc.sdp_type(), SdpType::Offer);
        assert_eq!(count_lines(local_desc.sdp(), "a=recvonly"), 3);

        assert!(negotiator.create_offer().await.is_err());
        negotiator.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejects_garbage_answer() {
        let mut negotiator = RtcNegotiator::new(None).await.unwrap();
        negotiator.create_offer().await.unwrap();
        let err = negotiator
            .apply_remote_description(SessionDescription::answer("not sdp".to_owned()))
            .await
            .unwrap_err();
        assert!(
            matches!(err, NegotiationError::MalformedDescription(_)),
            "{:?}",
            err
        );
        negotiator.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_closed_connection_is_not_reported_as_gathered() {
        let mut negotiator = RtcNegotiator::new(None).await.unwrap();
        negotiator.create_offer().await.unwrap();
        negotiator.close().await;

        let err = negotiator
            .await_local_description_ready()
            .await
            .unwrap_err();
        assert!(
            matches!(err, NegotiationError::TransportUnavailable(_)),
            "{:?}",
            err
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_description_requires_offer() {
        let mut negotiator = RtcNegotiator::new(None).await.unwrap();
        let err = negotiator
            .await_local_description_ready()
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::TransportUnavailable(_)));
        negotiator.close().await;
    }
}
