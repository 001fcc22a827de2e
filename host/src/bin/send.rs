//! # booth-send
//!
//! Dither an image locally and send it to a running print host over the
//! bridge WebSocket, using the chunked bitmap transfer.
//!
//! ```bash
//! # Print a photo on the already-connected printer
//! booth-send photo.jpg
//!
//! # Connect first, use ordered dithering
//! booth-send --connect AA:BB:CC:DD:EE:FF --mode ordered photo.jpg
//!
//! # Only write the dithered preview
//! booth-send --png preview.png photo.jpg
//! ```

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use futures::{SinkExt, Stream, StreamExt};
use image_processor::{DitherMode, DitherParams, PreprocessOptions, decode_bytes, dither, preprocess};
use print_bridge::message::{BridgeRequest, ConnectRequest};
use print_bridge::{BridgeEvent, CHUNK_STAGGER, encode_bitmap};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing_subscriber::EnvFilter;

/// Send an image to the photo-booth print host
#[derive(Parser, Debug)]
#[command(name = "booth-send")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Image file to print
    image: PathBuf,

    /// Bridge WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8080/bridge")]
    url: String,

    /// Connect to this printer before printing
    #[arg(long, value_name = "DEVICE_ID")]
    connect: Option<String>,

    /// Print width in dots
    #[arg(long, default_value = "384")]
    width: u32,

    /// Dither mode (floyd-steinberg, ordered, threshold)
    #[arg(long, default_value = "floyd-steinberg")]
    mode: DitherMode,

    /// Luminance cutoff for the threshold modes
    #[arg(long, default_value = "128")]
    black_point: u8,

    /// Rotate the output 180 degrees
    #[arg(long)]
    rotate: bool,

    /// Write the dithered bitmap to a PNG instead of printing
    #[arg(long, value_name = "FILE")]
    png: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let bytes = tokio::fs::read(&cli.image)
        .await
        .with_context(|| format!("reading {}", cli.image.display()))?;
    let img = decode_bytes(&bytes)?;
    let options = PreprocessOptions::new(cli.width).with_rotate_180(cli.rotate);
    let mut raster = preprocess(&img, &options)?;
    let bitmap = dither(
        &mut raster,
        cli.mode,
        DitherParams {
            threshold: cli.black_point,
        },
    );
    tracing::info!(
        width = bitmap.width(),
        height = bitmap.height(),
        mode = %cli.mode,
        "Image dithered"
    );

    if let Some(path) = &cli.png {
        bitmap.to_gray_image().save(path)?;
        tracing::info!("Preview written to {}", path.display());
        return Ok(());
    }

    let (ws, _) = tokio_tungstenite::connect_async(cli.url.as_str())
        .await
        .with_context(|| format!("connecting to {}", cli.url))?;
    let (mut sink, mut stream) = ws.split();

    if let BridgeEvent::PrinterStatus(status) =
        wait_for(&mut stream, |e| matches!(e, BridgeEvent::PrinterStatus(_))).await?
    {
        tracing::info!(connected = status.connected, state = %status.state, "Bridge ready");
    }

    if let Some(device_id) = cli.connect {
        let request = BridgeRequest::ConnectBluetoothPrinter(ConnectRequest { device_id });
        sink.send(Message::Text(serde_json::to_string(&request)?.into()))
            .await?;
        match wait_for(&mut stream, |e| {
            matches!(
                e,
                BridgeEvent::BluetoothConnected(_) | BridgeEvent::BluetoothError(_)
            )
        })
        .await?
        {
            BridgeEvent::BluetoothError(report) => bail!("Connect failed: {}", report.error),
            _ => tracing::info!("Printer connected"),
        }
    }

    let frames = encode_bitmap(&bitmap);
    tracing::info!(frames = frames.len(), "Sending bitmap");
    for (i, frame) in frames.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(CHUNK_STAGGER).await;
        }
        sink.send(Message::Text(serde_json::to_string(frame)?.into()))
            .await?;
    }

    match wait_for(&mut stream, |e| {
        matches!(e, BridgeEvent::PrintSuccess(_) | BridgeEvent::PrintFailed(_))
    })
    .await?
    {
        BridgeEvent::PrintFailed(outcome) => bail!(
            "Print failed: {}",
            outcome.error.unwrap_or_else(|| "unknown error".into())
        ),
        _ => tracing::info!("Print complete"),
    }

    sink.close().await?;
    Ok(())
}

/// Read bridge events until `accept` matches, logging progress on the way.
async fn wait_for<S, F>(stream: &mut S, mut accept: F) -> anyhow::Result<BridgeEvent>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    F: FnMut(&BridgeEvent) -> bool,
{
    while let Some(msg) = stream.next().await {
        let Message::Text(text) = msg? else {
            continue;
        };
        let event: BridgeEvent = match serde_json::from_str(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("Skipping unrecognized message: {e}");
                continue;
            }
        };
        if let BridgeEvent::PrintProgress(p) = &event {
            tracing::info!(status = %p.status, progress = p.progress, "Printing");
        }
        if accept(&event) {
            return Ok(event);
        }
    }
    bail!("Bridge closed the connection")
}
