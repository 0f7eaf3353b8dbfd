//! Avatar speaker binary entry point
//!
//! Opens a live talking-avatar stream and speaks each line of text through it.
//!
//! # Usage
//!
//! ```bash
//! # Speak lines typed on stdin
//! cargo run -p avatar-speaker -- \
//!   --signaling-url https://relay.example.com/api \
//!   --avatar https://example.com/avatar.png
//!
//! # Speak fixed lines, then exit
//! cargo run -p avatar-speaker -- \
//!   --config ./avatar.toml \
//!   --avatar https://example.com/avatar.png \
//!   "Hello there" "How can I help?"
//! ```

mod headless;

use anyhow::Context;
use avatar_stream::{
    AvatarEvent, AvatarStreamConfig, HttpSignalingClient, RtcPeerConnector, SessionRegistry,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Talking-avatar speaker
///
/// Streams a talking avatar over WebRTC and speaks text through it.
/// Text comes from positional arguments, or from stdin one line at a time.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (defaults and AVATAR_* variables otherwise)
    #[arg(short, long, env = "AVATAR_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling relay base URL, overrides the configuration
    #[arg(long, env = "AVATAR_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// Authorization header value sent with every signaling request
    #[arg(long, env = "AVATAR_AUTHORIZATION", hide_env_values = true)]
    authorization: Option<String>,

    /// Source image of the avatar to animate
    #[arg(short, long, env = "AVATAR_SOURCE_URL")]
    avatar: String,

    /// Fail instead of rendering a clip when streaming is unavailable
    #[arg(long, default_value_t = false)]
    no_fallback: bool,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false, env = "AVATAR_JSON_LOGS")]
    json_logs: bool,

    /// Seconds to keep the stream open after the last line
    #[arg(long, default_value_t = 5)]
    linger_secs: u64,

    /// Lines to speak; stdin is read when none are given
    text: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.json_logs);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("avatar-worker")
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async_main(args))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,webrtc=warn"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_config(args: &Args) -> anyhow::Result<AvatarStreamConfig> {
    let mut config =
        AvatarStreamConfig::load(args.config.as_ref()).context("failed to load configuration")?;

    if let Some(url) = &args.signaling_url {
        config.signaling.base_url = url.clone();
    }
    if let Some(auth) = &args.authorization {
        config.signaling.authorization = Some(auth.clone());
    }
    if args.no_fallback {
        config.clip_fallback.enabled = false;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        library = avatar_stream::version(),
        "Avatar speaker starting"
    );

    let config = build_config(&args)?;
    info!(
        signaling_url = %config.signaling.base_url,
        clip_fallback = config.clip_fallback.enabled,
        debounce_ms = config.dispatch.debounce_ms,
        "Configuration loaded"
    );

    let signaling = Arc::new(
        HttpSignalingClient::new(&config.signaling).context("failed to build signaling client")?,
    );
    let (video, surface) = headless::render_surface();
    let registry = SessionRegistry::new(
        config,
        signaling,
        Arc::new(RtcPeerConnector::new()),
        surface,
    )?;

    let event_log = tokio::spawn(log_events(registry.subscribe()));

    let spoken = tokio::select! {
        result = speak_all(&registry, &args) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
            0
        }
    };

    if spoken > 0 && args.linger_secs > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.linger_secs)) => {}
            _ = tokio::signal::ctrl_c() => info!("Ctrl+C received, shutting down"),
        }
    }

    registry.shutdown().await;
    event_log.abort();

    info!(
        lines = spoken,
        rtp_packets = video.packets(),
        "Avatar speaker stopped"
    );
    Ok(())
}

/// Speak every input line, returning how many were accepted
async fn speak_all(registry: &SessionRegistry, args: &Args) -> anyhow::Result<usize> {
    if !args.text.is_empty() {
        let mut spoken = 0;
        for line in &args.text {
            spoken += speak_line(registry, line, &args.avatar).await as usize;
        }
        return Ok(spoken);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut spoken = 0;
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        spoken += speak_line(registry, line, &args.avatar).await as usize;
    }
    Ok(spoken)
}

async fn speak_line(registry: &SessionRegistry, text: &str, avatar: &str) -> bool {
    match registry.speak(text, avatar).await {
        Ok(outcome) => {
            info!(?outcome, state = %registry.state(), "Line accepted");
            true
        }
        Err(e) => {
            warn!("Failed to speak line: {}", e);
            false
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<AvatarEvent>) {
    loop {
        match events.recv().await {
            Ok(AvatarEvent::StateChanged {
                stream_id,
                from,
                to,
            }) => {
                info!(stream_id = %stream_id, %from, %to, "Session state changed");
            }
            Ok(event) => info!(event = event.name(), ?event, "Avatar event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
