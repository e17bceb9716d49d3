//! WebRTC peer session.
//!
//! One peer connection per interpreter session, set up client-side:
//!
//! ```text
//!   mic frames ──► Opus encode ──► local track ──►┐
//!                                                 │ RTCPeerConnection
//!   "response" data channel (ordered) ◄──────────►│
//!                                                 │
//!   remote track ──► Opus decode ──► RemoteAudio ◄┘
//! ```
//!
//! Negotiation is non-trickle: gather every ICE candidate first, POST the
//! complete offer through [`SignalingClient`], apply the answer. The data
//! channel is created before the offer so it is part of that one exchange.

use crate::capture::FRAME_SAMPLES;
use crate::error::{Error, Result};
use crate::lang::LanguageCode;
use crate::signaling::SignalingClient;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const STUN_SERVER: &str = "stun:stun.l.google.com:19302";
/// Label of the JSON event channel. Fixed by the service.
const DATA_CHANNEL_LABEL: &str = "response";
/// Remote PCM frames buffered per subscriber before lagging.
const REMOTE_AUDIO_BUFFER: usize = 64;

// ── Events ────────────────────────────────────────────────────────

/// Transport-level notifications, in the order they happened.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The data channel opened; configuration can be pushed.
    ChannelOpen,
    /// One inbound data-channel text frame.
    Frame(String),
    /// The data channel closed.
    ChannelClosed,
    /// The transport failed: ICE failure, channel error, connection loss.
    TransportFailed(String),
    /// The remote audio track arrived and is being decoded.
    RemoteAudio(RemoteAudio),
}

/// Handle to the decoded remote audio stream, 48 kHz mono PCM.
#[derive(Debug, Clone)]
pub struct RemoteAudio {
    frames: broadcast::Sender<Vec<i16>>,
}

impl RemoteAudio {
    fn channel() -> (Self, broadcast::Sender<Vec<i16>>) {
        let (tx, _) = broadcast::channel(REMOTE_AUDIO_BUFFER);
        (Self { frames: tx.clone() }, tx)
    }

    /// Subscribe to decoded PCM frames. Slow subscribers skip ahead rather
    /// than stalling the decoder.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<i16>> {
        self.frames.subscribe()
    }
}

/// Root-mean-square level of one PCM frame, in `[0, 1]`. For level meters.
pub fn rms(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f64 = frame
        .iter()
        .map(|s| {
            let v = f64::from(*s) / f64::from(i16::MAX);
            v * v
        })
        .sum();
    (sum / frame.len() as f64).sqrt() as f32
}

// ── Session ───────────────────────────────────────────────────────

/// A connected peer: send side for configuration frames, close side for
/// teardown. Inbound traffic arrives through the event channel passed to
/// [`PeerSession::connect`].
pub struct PeerSession {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<RTCDataChannel>,
}

impl PeerSession {
    /// Build the peer, run the offer/answer exchange, and wire every
    /// callback to `events`. Returns once the remote description is
    /// applied; `PeerEvent::ChannelOpen` follows when the channel is live.
    pub async fn connect(
        signaling: &SignalingClient,
        party_a: LanguageCode,
        party_b: LanguageCode,
        frames: mpsc::Receiver<Vec<i16>>,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<PeerSession> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![STUN_SERVER.to_owned()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await?);

        // Outgoing microphone track
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "tolk-mic".to_owned(),
        ));
        let rtp_sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Read RTCP packets (required for WebRTC)
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
        });

        tokio::spawn(encode_outgoing(frames, Arc::clone(&track)));

        // Ordered data channel, created before the offer so it rides the
        // one and only SDP exchange
        let channel = pc
            .create_data_channel(
                DATA_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;

        let ev = events.clone();
        channel.on_open(Box::new(move || {
            let ev = ev.clone();
            Box::pin(async move {
                tracing::info!("data channel open");
                let _ = ev.send(PeerEvent::ChannelOpen).await;
            })
        }));

        let ev = events.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let ev = ev.clone();
            Box::pin(async move {
                if !msg.is_string {
                    return;
                }
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = ev.send(PeerEvent::Frame(text)).await;
                    }
                    Err(_) => tracing::trace!("dropping non-utf8 channel frame"),
                }
            })
        }));

        let ev = events.clone();
        channel.on_close(Box::new(move || {
            let ev = ev.clone();
            Box::pin(async move {
                tracing::info!("data channel closed");
                let _ = ev.send(PeerEvent::ChannelClosed).await;
            })
        }));

        let ev = events.clone();
        channel.on_error(Box::new(move |err| {
            let ev = ev.clone();
            Box::pin(async move {
                let _ = ev
                    .send(PeerEvent::TransportFailed(format!("data channel: {err}")))
                    .await;
            })
        }));

        // Inbound track: decode to PCM and fan out
        let ev = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let ev = ev.clone();
            Box::pin(async move {
                tracing::info!("remote audio track arrived");
                let (handle, pcm_tx) = RemoteAudio::channel();
                let _ = ev.send(PeerEvent::RemoteAudio(handle)).await;
                tokio::spawn(decode_incoming(track, pcm_tx));
            })
        }));

        let ev = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let ev = ev.clone();
            Box::pin(async move {
                tracing::debug!(state = %state, "peer connection state");
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Closed
                ) {
                    let _ = ev
                        .send(PeerEvent::TransportFailed(format!("connection {state}")))
                        .await;
                }
            })
        }));

        // Non-trickle: wait for the full candidate set, then ship one offer
        let offer = pc.create_offer(None).await?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await?;
        let _ = gathered.recv().await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| Error::Transport("missing local description".into()))?;
        let answer_sdp = signaling
            .exchange_offer(&local.sdp, party_a, party_b)
            .await?;
        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| Error::Signaling(format!("unusable answer SDP: {e}")))?;
        pc.set_remote_description(answer).await?;

        Ok(PeerSession { pc, channel })
    }

    /// Send one text frame on the data channel.
    pub async fn send_text(&self, payload: &str) -> Result<()> {
        self.channel
            .send_text(payload.to_owned())
            .await
            .map(|_| ())
            .map_err(Error::from)
    }

    /// Close channel and connection. Best effort on both: teardown errors
    /// are logged, never surfaced.
    pub async fn close(&self) {
        if let Err(e) = self.channel.close().await {
            tracing::debug!(error = %e, "data channel close");
        }
        if let Err(e) = self.pc.close().await {
            tracing::debug!(error = %e, "peer connection close");
        }
    }
}

// ── Codec tasks ───────────────────────────────────────────────────

/// Pull 20 ms PCM frames, Opus-encode, write onto the local track. Ends
/// when the capture side closes or the track rejects a sample.
async fn encode_outgoing(mut frames: mpsc::Receiver<Vec<i16>>, track: Arc<TrackLocalStaticSample>) {
    let mut encoder = match audiopus::coder::Encoder::new(
        audiopus::SampleRate::Hz48000,
        audiopus::Channels::Mono,
        audiopus::Application::Voip,
    ) {
        Ok(encoder) => encoder,
        Err(e) => {
            tracing::error!(error = %e, "opus encoder init failed");
            return;
        }
    };
    let mut output = vec![0u8; 1500];

    while let Some(frame) = frames.recv().await {
        if frame.len() != FRAME_SAMPLES {
            continue;
        }
        match encoder.encode(&frame, &mut output) {
            Ok(len) if len > 0 => {
                let sample = Sample {
                    data: Bytes::copy_from_slice(&output[..len]),
                    duration: Duration::from_millis(20),
                    ..Default::default()
                };
                if track.write_sample(&sample).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "opus encode failed"),
        }
    }
    tracing::debug!("outgoing audio encoder finished");
}

/// Read RTP from the remote track, Opus-decode, fan the PCM out.
async fn decode_incoming(track: Arc<TrackRemote>, pcm: broadcast::Sender<Vec<i16>>) {
    let mut decoder = match audiopus::coder::Decoder::new(
        audiopus::SampleRate::Hz48000,
        audiopus::Channels::Mono,
    ) {
        Ok(decoder) => decoder,
        Err(e) => {
            tracing::error!(error = %e, "opus decoder init failed");
            return;
        }
    };
    // Up to 120 ms per packet
    let mut buf = vec![0i16; FRAME_SAMPLES * 6];

    while let Ok((packet, _)) = track.read_rtp().await {
        if packet.payload.is_empty() {
            continue;
        }
        match decoder.decode(Some(packet.payload.as_ref()), &mut buf, false) {
            Ok(samples) if samples > 0 => {
                let _ = pcm.send(buf[..samples].to_vec());
            }
            Ok(_) => {}
            Err(e) => tracing::trace!(error = %e, "opus decode failed"),
        }
    }
    tracing::debug!("remote audio decoder finished");
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[0i16; 960]), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_full_scale_square_wave() {
        let frame: Vec<i16> = (0..960)
            .map(|i| if i % 2 == 0 { i16::MAX } else { -i16::MAX })
            .collect();
        let level = rms(&frame);
        assert!((level - 1.0).abs() < 1e-3, "got {level}");
    }

    #[tokio::test]
    async fn remote_audio_fans_out_to_all_subscribers() {
        let (handle, tx) = RemoteAudio::channel();
        let mut one = handle.subscribe();
        let mut two = handle.subscribe();

        tx.send(vec![1i16, 2, 3]).unwrap();

        assert_eq!(one.recv().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(two.recv().await.unwrap(), vec![1, 2, 3]);
    }
}
