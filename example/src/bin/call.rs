use anyhow::Result;
use clap::Parser;
use skillswap_call::media::permissions::StaticPermissionGate;
use skillswap_call::signaling::loopback::LoopbackSignaling;
use skillswap_call::testing::{spawn_signaling_server, HttpSignaling};
use skillswap_call::transport::rtc::RtcTransport;
use skillswap_call::transport::Transport;
use skillswap_call::{CallConfig, CallEvent, CallManager, InitArgs};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// the server address for this process
    local: String,
    /// the network address of the remote peer
    remote: String,
    /// participant id of this process
    #[arg(long, default_value = "alice")]
    id: String,
    /// participant id of the remote peer
    #[arg(long, default_value = "bob")]
    remote_id: String,
    /// call the remote peer instead of waiting for a call
    #[arg(long)]
    dial: bool,
    #[arg(long)]
    audio_only: bool,
    /// JSON file with a CallConfig
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%3f"),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Debug)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CallConfig::from_json_file(path)?,
        None => CallConfig::default(),
    };

    // envelopes received by the web server land here
    let hub = Arc::new(LoopbackSignaling::new(config.invite_ttl()));
    let (addr, server) = spawn_signaling_server(&cli.local, hub.clone()).await?;
    log::info!("listening for signals on {}", addr);
    let directory = HashMap::from([(cli.remote_id.clone(), cli.remote.clone())]);
    let signaling = Arc::new(HttpSignaling::new(hub, directory));

    let transport = match RtcTransport::new(&config) {
        Ok(transport) => Some(Arc::new(transport) as Arc<dyn Transport>),
        Err(e) => {
            log::error!("failed to create webrtc transport: {}", e);
            None
        }
    };

    // used to receive events from the CallManager
    let (event_tx, event_rx) = mpsc::unbounded_channel::<CallEvent>();
    let manager = CallManager::init(InitArgs {
        id: cli.id.clone(),
        config,
        transport,
        permissions: Arc::new(StaticPermissionGate::granted()),
        signaling,
        emitted_event_chan: event_tx,
    });
    let listener = manager.listen().await?;

    if cli.dial {
        let call = manager.start_call(&cli.remote_id, !cli.audio_only).await?;
        log::info!("calling {} on {}", cli.remote_id, call.channel());
    }

    tokio::select! {
        r = handle_events(manager.clone(), event_rx) => {
            println!("handle_events terminated: {:?}", r);
        }
        _ = listener => {
            println!("signaling terminated");
        }
        _ = server => {
            println!("signaling server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
        }
    }

    manager.leave_call().await?;
    Ok(())
}

async fn handle_events(
    manager: Arc<CallManager>,
    mut event_rx: mpsc::UnboundedReceiver<CallEvent>,
) -> Result<()> {
    while let Some(evt) = event_rx.recv().await {
        match evt {
            CallEvent::IncomingCall(notice) => {
                log::info!(
                    "event: IncomingCall from {} ({})",
                    notice.from,
                    if notice.is_video { "video" } else { "audio" }
                );
                // answer automatically. the accept joins, so don't block the event loop
                let manager = manager.clone();
                tokio::spawn(async move {
                    if let Err(e) = manager.accept_call().await {
                        log::error!("failed to accept call: {}", e);
                    }
                });
            }
            CallEvent::Ringing { channel, callee } => {
                log::info!("event: Ringing {} on {}", callee, channel);
            }
            CallEvent::Accepted { channel } => {
                log::info!("event: Accepted {}", channel);
            }
            CallEvent::Joined { channel, local_uid } => {
                log::info!("event: Joined {} as uid {}", channel, local_uid);
                let mut remote = manager.media().remote_tracks();
                tokio::spawn(async move {
                    while remote.changed().await.is_ok() {
                        let participants = remote.borrow().len();
                        log::info!("remote participants with tracks: {}", participants);
                    }
                });
            }
            CallEvent::Ended { session } => {
                log::info!(
                    "event: Ended {} after {}: {:?}",
                    session.channel_id,
                    skillswap_call::format_duration(session.duration()),
                    session.end_reason
                );
            }
            CallEvent::Failed { channel, error } => {
                log::error!("event: Failed {:?}: {}", channel, error);
            }
        }
    }
    Ok(())
}
