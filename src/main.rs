//! framepool demo: a simulated camera driven by a periodic scheduler, with
//! every frame streamed through a `FrameReader` in fixed-size chunks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use flume::Receiver;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use framepool::capture::SimulatedSource;
use framepool::{utils, Camera, Config, FrameImage, FrameReader};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    utils::init_tracing("framepool=info")?;

    info!("framepool launching...");

    // Optional TOML file as first argument
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;

    let source = SimulatedSource::new().with_frame_interval(Duration::from_millis(30));
    let mut camera = Camera::new(config.camera.clone(), source);

    // Hand frames to the streaming task; skip while it is still busy
    let (tx, rx) = flume::bounded::<Arc<FrameImage>>(1);
    camera.add_image_callback(move |image| {
        if tx.try_send(image).is_err() {
            debug!("Stream busy, frame skipped");
        }
    });
    let streamer = tokio::spawn(stream_frames(rx, config.stream.chunk_size));

    let setup = camera.setup();
    camera.dump_config();
    setup.map_err(|e| eyre!("camera setup failed: {}", e))?;

    let mut update = tokio::time::interval(Duration::from_millis(
        config.scheduler.update_interval_ms,
    ));
    let mut tick = tokio::time::interval(Duration::from_millis(config.scheduler.loop_interval_ms));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = update.tick() => camera.update(),
            _ = tick.tick() => {
                camera.poll();
            }
            _ = &mut shutdown => break,
        }
    }

    info!(stats = ?camera.stats(), "framepool shutting down");
    drop(camera);
    let streamed = streamer.await??;
    info!("Streamed {} frames", streamed);
    Ok(())
}

/// Drain each frame through a reader, `chunk_size` bytes at a time.
async fn stream_frames(rx: Receiver<Arc<FrameImage>>, chunk_size: usize) -> Result<u64> {
    let mut sink = tokio::io::sink();
    let mut reader = FrameReader::new();
    let mut frames = 0;

    while let Ok(image) = rx.recv_async().await {
        let sequence = image.sequence();
        reader.set_image(image);

        while reader.available() > 0 {
            let n = reader.available().min(chunk_size.max(1));
            sink.write_all(&reader.peek_data_buffer()?[..n]).await?;
            reader.consume_data(n)?;
        }

        reader.return_image();
        frames += 1;
        debug!(sequence, "Frame streamed");
    }

    Ok(frames)
}
