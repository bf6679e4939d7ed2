use bounce_track::logging::init_logging;
use bounce_track::{AppError, MediaSession, Producer, Settings};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let settings = Settings::load()?;
    init_logging(settings.log_level);

    let session = MediaSession::listen(&settings.network.address()).await?;
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping producer");
        }
        ctrl_c.cancel();
    });

    let report = Producer::from_settings(settings, session)
        .run(cancel)
        .await
        .inspect_err(|e| error!("Producer failed: {}", e))?;

    let stats = &report.stats;
    println!(
        "frames: {}  matched: {}  missed: {}  unmatched: {}  expired: {}",
        stats.recorded, stats.matched, stats.missed, stats.unmatched, stats.expired
    );
    if let (Some(mean), Some(max)) = (stats.mean_error, stats.max_error) {
        println!("error: mean {:.2}px  max {:.2}px", mean, max);
    }
    Ok(())
}
