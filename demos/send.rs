use std::time::Duration;

use avlink::{
    frame::{AudioFrame, FrameRate, VideoFormat, VideoFrame},
    send::{self, Sender},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const RATE: FrameRate = FrameRate::new(30000, 1001);
const SAMPLE_RATE: u32 = 48_000;

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set-up the log and traces handler
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let sender = Sender::new(send::Config {
        name: "super source",
        clock_audio: false,
        ..Default::default()
    })?;

    tracing::info!("Announced as `{}`", sender.source());

    let mut video = VideoFrame::new(1280, 720, VideoFormat::UYVY, RATE);
    let samples = (SAMPLE_RATE as i64 * RATE.den as i64 / RATE.num as i64) as usize;

    for idx in 0u64.. {
        // A grey level sweeping through the luma range.
        let luma = 16 + (idx % 220) as u8;
        for pixel in video.data.chunks_exact_mut(2) {
            pixel[0] = 128;
            pixel[1] = luma;
        }

        let tone = (0..samples)
            .map(|sample| {
                let t = (idx as usize * samples + sample) as f32 / SAMPLE_RATE as f32;

                (t * 440.0 * std::f32::consts::TAU).sin() * 0.1
            })
            .collect::<Vec<_>>();
        sender
            .send_audio(&AudioFrame::from_planes(SAMPLE_RATE, &[&tone, &tone]))
            .await?;

        // Paced to the frame rate, as video clocking is enabled.
        sender.send_video(&video).await?;

        let (tally, changed) = sender.get_tally(Duration::ZERO).await;
        if changed {
            tracing::info!("Tally changed: {tally:?}");
        }
    }

    Ok(())
}
