use bounce_track::app::LiveView;
use bounce_track::consumer::{BroadcastDisplay, FrameDisplay, LogDisplay};
use bounce_track::logging::init_logging;
use bounce_track::{AppError, Consumer, MediaSession, Settings};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let settings = Settings::load()?;
    init_logging(settings.log_level);

    let session = MediaSession::connect(&settings.network.address()).await?;
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping consumer");
        }
        ctrl_c.cancel();
    });

    let display_settings = settings.display.clone();
    if !display_settings.window {
        let snapshot = Consumer::new(settings, session, Box::new(LogDisplay))
            .run(cancel)
            .await
            .inspect_err(|e| error!("Consumer failed: {}", e))?;
        println!("{:?}", snapshot);
        return Ok(());
    }

    let (display, frame_rx) = BroadcastDisplay::new(display_settings.broadcast_capacity);
    let consumer = Consumer::new(settings, session, Box::new(display) as Box<dyn FrameDisplay>);
    let view = LiveView::new(frame_rx, consumer.slot(), consumer.metrics());
    let run = tokio::spawn(consumer.run(cancel.clone()));

    // The window owns the main thread until it is closed.
    let ui_result = tokio::task::block_in_place(|| view.start_gui(&display_settings));
    cancel.cancel();

    let snapshot = run
        .await
        .map_err(|e| AppError::Ui(format!("consumer task failed: {}", e)))??;
    println!("{:?}", snapshot);
    ui_result
}
