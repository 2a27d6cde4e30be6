use std::sync::Arc;

use anyhow::Context;
use beach_share::cli::{Cli, Command};
use beach_share::media::{CaptureSource, IvfFileCapture, LoggingSink, PlaceholderCapture};
use beach_share::signaling::websocket::SocketIoChannel;
use beach_share::telemetry::logging;
use beach_share::transport::webrtc::WebRtcTransportFactory;
use beach_share::{SessionContext, SessionController, SignalingRouter};
use clap::Parser;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).context("failed to initialise logging")?;
    let config = cli
        .connection
        .to_config()
        .context("invalid connection settings")?;

    let (channel, inbound) = SocketIoChannel::connect(&config.signaling_url)
        .await
        .with_context(|| format!("cannot reach signaling relay at {}", config.signaling_url))?;
    let factory = Arc::new(WebRtcTransportFactory::new(config.ice_servers())?);
    let ctx = SessionContext::new(
        config.room_id.clone(),
        channel,
        factory,
        Arc::new(LoggingSink),
    );
    let router = Arc::new(SignalingRouter::new(Arc::clone(&ctx)));
    let router_task = router.spawn(inbound);

    let capture: Arc<dyn CaptureSource> = match &cli.command {
        Command::Share(args) => match &args.ivf {
            Some(path) => Arc::new(IvfFileCapture::new(path)),
            None => Arc::new(PlaceholderCapture),
        },
        Command::View => Arc::new(PlaceholderCapture),
    };
    let controller = SessionController::new(Arc::clone(&ctx), capture);
    match cli.command {
        Command::Share(_) => controller
            .start_sharing()
            .await
            .context("failed to start sharing")?,
        Command::View => controller
            .start_viewing()
            .await
            .context("failed to start viewing")?,
    }
    info!(room = %config.room_id, role = %ctx.role(), "session running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    controller.shutdown().await;
    router_task.abort();
    Ok(())
}
