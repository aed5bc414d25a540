use avlink::{
    recv::{Capture, Recv},
    scan::Scan,
    FOREVER,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set-up the log and traces handler
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let mut scan = Scan::new(Default::default())?;

    let source = loop {
        if let Some(source) = scan.current_sources().first() {
            break source.clone();
        }

        scan.wait_for_change(FOREVER).await;
    };

    tracing::info!("Got source: {source}");

    let recv = Recv::with_source(source, Default::default())?;

    loop {
        match recv.capture(true, true, true, FOREVER).await {
            Capture::Video(frame) => {
                tracing::info!(
                    "Video: {}px x {}px {}, timecode {}",
                    frame.width,
                    frame.height,
                    frame.format.as_ref(),
                    frame.timecode
                );

                recv.free_video(frame)?;
            }
            Capture::Audio(frame) => {
                tracing::info!(
                    "Audio: {} samples x {} channels at {}Hz",
                    frame.samples,
                    frame.channels,
                    frame.sample_rate
                );

                recv.free_audio(frame)?;
            }
            Capture::Metadata(frame) => {
                tracing::info!("Metadata: {}", frame.data);

                recv.free_metadata(frame)?;
            }
            Capture::StatusChange => tracing::info!(
                "Status changed, ptz: {}, recording: {}, web control: {:?}",
                recv.ptz_supported(),
                recv.recording_supported(),
                recv.web_control()
            ),
            Capture::Error => tracing::warn!("Lost the connection to the source"),
            Capture::None => (),
        }
    }
}
