//! Preview peer sessions.
//!
//! Each connected viewer gets a [`PreviewSession`]. On creation it becomes
//! the capturer's active sink and counts the frames it receives. It answers
//! SDP offers over the signaling link and closes itself on `bye`.
//!
//! Signaling payloads are JSON objects tagged by `type`:
//!
//! ```text
//! {"type":"offer","sdp":"..."}
//! {"type":"answer","sdp":"..."}
//! {"type":"candidate","candidate":"...","sdpMid":"0","sdpMLineIndex":0}
//! {"type":"bye"}
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use streamkit_core::capture::{
    FrameCapturer, GpuFrameCapturer, SinkWants, VideoFrame, VideoSink,
};
use streamkit_core::{
    IceConnectionState, PeerId, PeerLink, PeerSession, PeerSessionContext, PeerSessionFactory,
    StreamkitError,
};

// ── Signaling messages ───────────────────────────────────────────

/// A message exchanged with a viewer over the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate(IceCandidate),
    Bye,
}

/// A trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

impl SignalMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ── FrameCounter ─────────────────────────────────────────────────

/// Sink that counts frames, per session and into a shared total.
struct FrameCounter {
    frames: AtomicU64,
    total: Arc<AtomicU64>,
}

impl VideoSink for FrameCounter {
    fn on_frame(&self, _frame: &VideoFrame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }
}

// ── PreviewSession ───────────────────────────────────────────────

/// A viewer session that previews the rendered stream.
pub struct PreviewSession {
    peer_id: PeerId,
    name: String,
    link: PeerLink,
    capturer: Arc<GpuFrameCapturer>,
    counter: Arc<FrameCounter>,
    sink: Arc<dyn VideoSink>,
    ice_servers: Vec<String>,
}

impl PreviewSession {
    /// Frames this session's sink has received.
    pub fn frames_received(&self) -> u64 {
        self.counter.frames.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn answer(&self, offer_sdp: &str) {
        let sdp = format!(
            "v=0\r\ns=streamkit\r\na=x-peer:{}\r\na=x-offer-bytes:{}\r\na=x-ice-servers:{}\r\n",
            self.peer_id,
            offer_sdp.len(),
            self.ice_servers.len()
        );
        match (SignalMessage::Answer { sdp }).to_json() {
            Ok(json) => {
                if let Err(e) = self.link.send_message(json) {
                    warn!(peer_id = self.peer_id, "answer not queued: {e}");
                    return;
                }
                self.link.report_state(IceConnectionState::Checking);
                self.link.report_state(IceConnectionState::Connected);
            }
            Err(e) => warn!(peer_id = self.peer_id, "failed to encode answer: {e}"),
        }
    }
}

impl PeerSession for PreviewSession {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn handle_message(&self, message: &str) {
        match SignalMessage::parse(message) {
            Ok(SignalMessage::Offer { sdp }) => {
                info!(peer_id = self.peer_id, "offer received; answering");
                self.answer(&sdp);
            }
            Ok(SignalMessage::Candidate(candidate)) => {
                debug!(peer_id = self.peer_id, candidate = %candidate.candidate, "remote candidate");
            }
            Ok(SignalMessage::Bye) => {
                info!(peer_id = self.peer_id, "viewer said bye");
                self.link.report_state(IceConnectionState::Closed);
            }
            Ok(SignalMessage::Answer { .. }) => {
                warn!(peer_id = self.peer_id, "unexpected answer from viewer");
            }
            Err(e) => warn!(peer_id = self.peer_id, "malformed signaling message: {e}"),
        }
    }
}

impl Drop for PreviewSession {
    fn drop(&mut self) {
        self.capturer.remove_sink_if_active(&self.sink);
        info!(
            peer_id = self.peer_id,
            frames = self.frames_received(),
            "preview session closed"
        );
    }
}

// ── PreviewSessionFactory ────────────────────────────────────────

/// Builds a [`PreviewSession`] per connected viewer.
pub struct PreviewSessionFactory {
    capturer: Arc<GpuFrameCapturer>,
    max_fps: u32,
    frames_delivered: Arc<AtomicU64>,
    sessions_created: AtomicU64,
}

impl PreviewSessionFactory {
    pub fn new(capturer: Arc<GpuFrameCapturer>, max_fps: u32) -> Self {
        Self {
            capturer,
            max_fps,
            frames_delivered: Arc::new(AtomicU64::new(0)),
            sessions_created: AtomicU64::new(0),
        }
    }

    /// Frames delivered to any session so far.
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn sessions_created(&self) -> u64 {
        self.sessions_created.load(Ordering::Relaxed)
    }
}

impl PeerSessionFactory for PreviewSessionFactory {
    fn create(&self, ctx: PeerSessionContext) -> Result<Arc<dyn PeerSession>, StreamkitError> {
        debug!(
            peer_id = ctx.peer_id,
            device = ?ctx.device.as_ref().map(|d| d.name()),
            software = ctx.enable_software,
            "creating preview session"
        );

        let counter = Arc::new(FrameCounter {
            frames: AtomicU64::new(0),
            total: Arc::clone(&self.frames_delivered),
        });
        let sink: Arc<dyn VideoSink> = counter.clone();
        self.capturer.add_or_update_sink(
            Arc::clone(&sink),
            SinkWants {
                max_framerate_fps: Some(self.max_fps),
                ..Default::default()
            },
        );
        self.sessions_created.fetch_add(1, Ordering::Relaxed);

        Ok(Arc::new(PreviewSession {
            peer_id: ctx.peer_id,
            name: ctx.name,
            link: ctx.link,
            capturer: Arc::clone(&self.capturer),
            counter,
            sink,
            ice_servers: ctx.config.ice_servers.clone(),
        }))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use streamkit_core::capture::{
        CaptureFormat, EncoderBinding, FrameDisposition, PixelFormat, SoftwareDevice, TextureDesc,
    };
    use streamkit_core::{Conductor, ConductorConfig, EncodePath, LocalRelay, RtcConfig};

    struct Harness {
        relay: Arc<LocalRelay>,
        factory: Arc<PreviewSessionFactory>,
        capturer: Arc<GpuFrameCapturer>,
        device: Arc<SoftwareDevice>,
        conductor: Conductor,
    }

    fn harness() -> Harness {
        let device = Arc::new(SoftwareDevice::new());
        let capturer = Arc::new(GpuFrameCapturer::new(
            device.clone(),
            Arc::new(EncoderBinding::new()),
            EncodePath::Hardware,
        ));
        capturer.initialize().unwrap();
        capturer.start(CaptureFormat::new(16, 16, 30));

        let relay = Arc::new(LocalRelay::new());
        let factory = Arc::new(PreviewSessionFactory::new(capturer.clone(), 30));
        let conductor = Conductor::new(
            relay.clone(),
            factory.clone(),
            RtcConfig::default(),
            ConductorConfig::default(),
            Some(device.clone()),
        )
        .unwrap();
        conductor.connect_signalling("test");
        Harness {
            relay,
            factory,
            capturer,
            device,
            conductor,
        }
    }

    fn offer() -> String {
        SignalMessage::Offer {
            sdp: "v=0".into(),
        }
        .to_json()
        .unwrap()
    }

    #[test]
    fn message_json_shape() {
        assert_eq!(SignalMessage::Bye.to_json().unwrap(), r#"{"type":"bye"}"#);
        let parsed = SignalMessage::parse(
            r#"{"type":"candidate","candidate":"c1","sdpMid":"0","sdpMLineIndex":0}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            SignalMessage::Candidate(IceCandidate {
                candidate: "c1".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            })
        );
        assert!(SignalMessage::parse("not json").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn offer_is_answered() {
        let h = harness();
        h.relay.peer_joined(1, "viewer");
        h.relay.deliver(1, &offer());
        tokio::time::sleep(Duration::from_millis(600)).await;

        let sent = h.relay.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 1);
        assert!(matches!(
            SignalMessage::parse(&sent[0].1).unwrap(),
            SignalMessage::Answer { .. }
        ));
        assert_eq!(h.conductor.peer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn session_receives_frames_until_bye() {
        let h = harness();
        let target = h
            .device
            .create_render_target(TextureDesc::new(16, 16, PixelFormat::Bgra8));

        h.relay.peer_joined(1, "viewer");
        assert_eq!(h.factory.sessions_created(), 1);
        assert_eq!(
            h.capturer.send_texture(&*target).unwrap(),
            FrameDisposition::Delivered
        );
        assert_eq!(h.factory.frames_delivered(), 1);

        h.relay.deliver(1, r#"{"type":"bye"}"#);
        assert_eq!(h.conductor.peer_count(), 0);
        assert_eq!(
            h.capturer.send_texture(&*target).unwrap(),
            FrameDisposition::LoopedBack
        );
    }

    #[tokio::test(start_paused = true)]
    async fn older_session_drop_keeps_newer_sink() {
        let h = harness();
        let target = h
            .device
            .create_render_target(TextureDesc::new(16, 16, PixelFormat::Bgra8));

        h.relay.peer_joined(1, "first");
        h.relay.peer_joined(2, "second");
        h.relay.peer_left(1);

        assert_eq!(
            h.capturer.send_texture(&*target).unwrap(),
            FrameDisposition::Delivered
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_message_is_ignored() {
        let h = harness();
        h.relay.peer_joined(1, "viewer");
        h.relay.deliver(1, "garbage");
        h.relay.deliver(1, r#"{"type":"answer","sdp":"x"}"#);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(h.relay.sent().is_empty());
        assert_eq!(h.conductor.peer_count(), 1);
    }
}
