//! Streaming service core logic.
//!
//! Wires the pieces together and runs the render loop:
//!
//! 1. A software GPU device, the encoder binding, and a
//!    [`GpuFrameCapturer`] started at the configured format.
//! 2. An in-process [`LocalRelay`] and a [`Conductor`] that creates a
//!    [`PreviewSession`](crate::session::PreviewSession) per viewer.
//! 3. Optionally, a demo task that makes simulated viewers join, send an
//!    offer, and later say bye.
//! 4. The render loop: while at least one viewer is connected, draw the
//!    test pattern and hand the render target to the capturer, paced to
//!    the target frame rate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use streamkit_core::capture::{
    EncoderBinding, FrameCapturer, FrameDisposition, GpuFrameCapturer, PixelFormat,
    SoftwareDevice, TextureDesc,
};
use streamkit_core::{Conductor, LocalRelay, PeerId, StreamkitError};

use crate::config::{DemoConfig, ServerConfig};
use crate::renderer::TestPattern;
use crate::session::{PreviewSessionFactory, SignalMessage};

/// Totals reported when the service stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceReport {
    /// Frames drawn by the renderer.
    pub frames_rendered: u64,
    /// Frames the capturer accepted (delivered or looped back).
    pub frames_captured: u64,
    /// Frames lost to GPU errors.
    pub frames_dropped: u64,
    /// Frames that reached a viewer session.
    pub frames_delivered: u64,
    /// Viewer sessions created.
    pub sessions_created: u64,
    /// Signaling messages the relay accepted.
    pub messages_relayed: u64,
}

// ── StreamingService ─────────────────────────────────────────────

/// The top-level streaming service.
pub struct StreamingService {
    config: ServerConfig,
    running: Arc<AtomicBool>,
}

impl StreamingService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task. Store `false` to stop.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the service is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the service until stopped.
    pub async fn run(&self) -> Result<ServiceReport, StreamkitError> {
        self.running.store(true, Ordering::SeqCst);

        let format = self.config.to_capture_format();
        let device = Arc::new(SoftwareDevice::new());
        let binding = Arc::new(EncoderBinding::new());
        let capturer = Arc::new(GpuFrameCapturer::new(
            device.clone(),
            binding,
            self.config.encode_path(),
        ));
        capturer.initialize()?;
        capturer.start(format);

        let relay = Arc::new(LocalRelay::new());
        let factory = Arc::new(PreviewSessionFactory::new(
            capturer.clone(),
            self.config.capture.fps,
        ));
        let conductor = Conductor::new(
            relay.clone(),
            factory.clone(),
            self.config.to_rtc_config(),
            self.config.to_conductor_config(),
            Some(device.clone()),
        )?;
        conductor.connect_signalling(&self.config.signaling.client_name);

        let demo = self
            .config
            .demo
            .enabled
            .then(|| tokio::spawn(drive_demo(relay.clone(), self.config.demo.clone())));

        let target = device.create_render_target(TextureDesc::new(
            format.width,
            format.height,
            PixelFormat::Bgra8,
        ));
        let mut pattern = TestPattern::new();
        let mut report = ServiceReport::default();
        let mut window = FrameWindow::new();

        info!(
            width = format.width,
            height = format.height,
            fps = self.config.capture.fps,
            path = ?self.config.encode_path(),
            "render loop started"
        );

        while self.running.load(Ordering::SeqCst) {
            let loop_start = Instant::now();

            if conductor.peer_count() > 0 {
                pattern.render(&target);
                report.frames_rendered += 1;

                match capturer.send_texture(&*target) {
                    Ok(FrameDisposition::Skipped) => {}
                    Ok(_) => {
                        report.frames_captured += 1;
                        window.frames += 1;
                    }
                    Err(e) => {
                        report.frames_dropped += 1;
                        warn!("frame dropped: {e}");
                    }
                }
            }

            if window.started.elapsed() >= Duration::from_secs(1) {
                report.messages_relayed += drain_relay(&relay);
                debug!(
                    fps = window.frames,
                    peers = conductor.peer_count(),
                    pending = conductor.pending_messages(),
                    delivered = factory.frames_delivered(),
                    "render stats"
                );
                window = FrameWindow::new();
            }

            pace(loop_start, format.interval).await;
        }

        if let Some(demo) = demo {
            stop_task(demo).await;
        }
        if let Err(e) = conductor.shutdown().await {
            warn!("conductor shutdown: {e}");
        }
        capturer.stop();

        report.messages_relayed += drain_relay(&relay);
        report.frames_delivered = factory.frames_delivered();
        report.sessions_created = factory.sessions_created();

        self.running.store(false, Ordering::SeqCst);
        info!(?report, "streaming service stopped");
        Ok(report)
    }
}

// ── Internal ─────────────────────────────────────────────────────

struct FrameWindow {
    started: Instant,
    frames: u64,
}

impl FrameWindow {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            frames: 0,
        }
    }
}

/// Sleep for the remainder of the frame interval.
async fn pace(loop_start: Instant, interval: Duration) {
    let elapsed = loop_start.elapsed();
    if elapsed < interval {
        tokio::time::sleep(interval - elapsed).await;
    }
}

/// Collect what the relay accepted, logging each message.
fn drain_relay(relay: &LocalRelay) -> u64 {
    let sent = relay.take_sent();
    for (peer_id, message) in &sent {
        debug!(peer_id, message = %message, "relayed to viewer");
    }
    sent.len() as u64
}

async fn stop_task(handle: JoinHandle<()>) {
    handle.abort();
    // Cancellation is the expected outcome.
    let _ = handle.await;
}

/// Simulated viewers: join, offer, and (optionally) say bye.
async fn drive_demo(relay: Arc<LocalRelay>, demo: DemoConfig) {
    let join_interval = Duration::from_millis(demo.join_interval_ms);
    let mut joined: Vec<PeerId> = Vec::new();

    for n in 0..demo.peers {
        let Ok(peer_id) = PeerId::try_from(n + 1) else {
            break;
        };
        relay.peer_joined(peer_id, &format!("viewer-{peer_id}"));
        send_as(&relay, peer_id, &SignalMessage::Offer {
            sdp: format!("v=0\r\ns=viewer-{peer_id}\r\n"),
        });
        joined.push(peer_id);
        tokio::time::sleep(join_interval).await;
    }

    if demo.session_secs == 0 {
        return;
    }
    tokio::time::sleep(Duration::from_secs(demo.session_secs)).await;
    for peer_id in joined {
        send_as(&relay, peer_id, &SignalMessage::Bye);
    }
}

fn send_as(relay: &LocalRelay, peer_id: PeerId, message: &SignalMessage) {
    match message.to_json() {
        Ok(json) => relay.deliver(peer_id, &json),
        Err(e) => warn!(peer_id, "failed to encode demo message: {e}"),
    }
}

// ── Tests ────────────────────────────────────────────────────────
