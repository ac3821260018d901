mod tracing_helper;

use std::{future::pending, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use recvpeer_lib::{
    config::Config,
    session::{
        ConnectionState, NegotiationSession, NegotiationState, PeerEvent, RtcNegotiator,
        SessionNegotiator,
    },
    signaling::channel::{signaling_url, SignalingChannel, StdioChannel},
};
use tokio::{select, signal::ctrl_c, sync::broadcast};
use tracing::{debug, info, warn};

/// Negotiates a receive-only WebRTC session (1 audio, 2 video) through a
/// signaling server, or by hand when no server is configured.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Signaling server, `host:port` or a `ws://` URL
    #[arg(short, long, env = "RECVPEER_ADDRESS")]
    address: Option<String>,

    /// STUN server used for candidate discovery
    #[arg(long)]
    stun: Option<String>,

    #[arg(short, long, default_value = "recvpeer.toml")]
    config: PathBuf,

    /// Relay the offer and answer through stdin/stdout
    #[arg(long)]
    manual: bool,

    #[arg(long)]
    no_color: bool,
}

async fn watch_peer_events(events: &mut broadcast::Receiver<PeerEvent>) -> Option<ConnectionState> {
    loop {
        match events.recv().await {
            Ok(PeerEvent::ConnectionStateChanged(state)) => {
                info!("connection state: {}", state);
                if state.is_terminal() {
                    return Some(state);
                }
            }
            Ok(PeerEvent::TrackReceived(track)) => info!(
                "receiving {} track {} (stream {})",
                track.kind(),
                track.id(),
                track.stream_id()
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("missed {} peer events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn negotiate<C>(
    mut session: NegotiationSession<RtcNegotiator, C>,
    mut events: broadcast::Receiver<PeerEvent>,
) -> Result<()>
where
    C: SignalingChannel,
{
    let state = session.run().await.clone();
    if let NegotiationState::Failed(failure) = state {
        session.close().await;
        bail!("{}", failure);
    }
    if let Some(offer) = session.local_offer() {
        debug!("published offer: {}", offer);
    }

    info!("waiting for media, press ctrl-c to stop");
    let result = select! {
        state = watch_peer_events(&mut events) => match state {
            Some(ConnectionState::Failed) => Err(anyhow::anyhow!("peer connection failed")),
            _ => Ok(()),
        },
        _ = async {
            session.drain_signaling().await;
            pending::<()>().await
        } => Ok(()),
        result = ctrl_c() => result.context("Failed to listen for ctrl-c"),
    };
    session.close().await;
    result
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(&args.config)
        .await?
        .with_signaling_address(args.address)
        .with_stun_server(args.stun);

    let negotiator = RtcNegotiator::new(config.ice_server())
        .await
        .context("Failed to create peer connection")?;
    let events = negotiator.subscribe();

    match config.signaling_address().as_deref() {
        Some(address) if !args.manual => {
            info!("signaling through {}", signaling_url(address));
            let session =
                NegotiationSession::connect(address, negotiator, config.timeouts()).await;
            negotiate(session, events).await
        }
        _ => {
            info!("no signaling server, relaying by hand");
            let session =
                NegotiationSession::new(negotiator, StdioChannel::stdio(), config.timeouts());
            negotiate(session, events).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_helper::init_tracing(!args.no_color)?;
    run(args).await
}
