use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::{Handle, RuntimeFlavor};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
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

use crate::error::{Error, Result};
use crate::peer::{PeerConfig, PeerConnector, PeerHandle, PeerState};
use crate::session::SessionEvents;

/// Run `fut` to completion from synchronous code, whether or not the calling
/// thread is already inside the runtime.
///
/// Panics when called from within a current-thread runtime, where
/// `block_in_place` is unavailable. The loops call in from plain threads;
/// `RtcPeer::close` handles the current-thread case itself.
fn block_on<F: Future>(handle: &Handle, fut: F) -> F::Output {
    match Handle::try_current() {
        Ok(current) => tokio::task::block_in_place(|| current.block_on(fut)),
        Err(_) => handle.block_on(fut),
    }
}

fn peer_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
    }
}

/// True exactly once, on the first transition to connected.
fn first_open(opened: &AtomicBool, state: RTCPeerConnectionState) -> bool {
    state == RTCPeerConnectionState::Connected && !opened.swap(true, Ordering::Relaxed)
}

/// Creates webrtc-rs peer connections that each carry one H.264 video track.
pub struct RtcConnector {
    api: API,
    handle: Handle,
    sample_duration: Duration,
}

impl RtcConnector {
    pub fn new(handle: Handle, sample_duration: Duration) -> Result<Self> {
        // Create a MediaEngine object to configure the supported codec
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;

        // NACK responder and RTCP reports come from the default interceptors
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            handle,
            sample_duration,
        })
    }

    async fn open(&self, config: PeerConfig, events: SessionEvents) -> Result<RtcPeer> {
        let mut rtc_config = RTCConfiguration::default();
        if !config.ice_servers.is_empty() {
            log::info!("STUN server is {}", config.ice_servers.join(", "));
            rtc_config.ice_servers = vec![RTCIceServer {
                urls: config.ice_servers,
                ..Default::default()
            }];
        }
        let pc = Arc::new(self.api.new_peer_connection(rtc_config).await?);

        let state_events = events.clone();
        let opened = AtomicBool::new(false);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            if first_open(&opened, s) {
                log::info!("Video to {} opened", state_events.id());
            }
            state_events.state_changed(peer_state(s));
            Box::pin(async {})
        }));

        // the callback holds only a weak reference to its own connection
        let weak_pc: Weak<RTCPeerConnection> = Arc::downgrade(&pc);
        pc.on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
            let weak_pc = weak_pc.clone();
            let events = events.clone();
            Box::pin(async move {
                log::debug!("Gathering state for {}: {:?}", events.id(), s);
                if s != RTCIceGathererState::Complete {
                    return;
                }
                let Some(pc) = weak_pc.upgrade() else {
                    return;
                };
                match pc.local_description().await {
                    Some(desc) => events.gathering_complete(&desc.sdp_type.to_string(), &desc.sdp),
                    None => log::warn!("Gathering finished for {} without a local description", events.id()),
                }
            })
        }));

        let setup = async {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_H264.to_owned(),
                    ..Default::default()
                },
                "video-stream".to_owned(),
                format!("stream-{}", rand::random::<u32>()),
            ));
            let rtp_sender = pc
                .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;

            // Read incoming RTCP packets
            // Before these packets are returned they are processed by interceptors. For things
            // like NACK this needs to be called.
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
            });

            // The track is attached, so the offer can be generated now. Gathering
            // completes later and the description is sent from the callback.
            let offer = pc.create_offer(None).await?;
            pc.set_local_description(offer).await?;

            Ok::<_, Error>(track)
        };
        let track = release_on_error(&pc, setup.await).await?;

        Ok(RtcPeer {
            pc,
            track,
            handle: self.handle.clone(),
            sample_duration: self.sample_duration,
        })
    }
}

/// Close a connection whose setup failed half way.
async fn release_on_error<T>(pc: &RTCPeerConnection, res: Result<T>) -> Result<T> {
    if res.is_err() {
        if let Err(e) = pc.close().await {
            log::warn!("Failed to close half-open peer connection: {}", e);
        }
    }
    res
}

impl PeerConnector for RtcConnector {
    fn connect(&self, config: PeerConfig, events: SessionEvents) -> Result<Box<dyn PeerHandle>> {
        let peer = block_on(&self.handle, self.open(config, events))?;
        Ok(Box::new(peer))
    }
}

pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    handle: Handle,
    sample_duration: Duration,
}

impl PeerHandle for RtcPeer {
    fn set_remote_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_owned())?;
        block_on(&self.handle, self.pc.set_remote_description(answer))?;
        Ok(())
    }

    fn send_sample(&self, data: &Bytes) -> Result<()> {
        if self.pc.connection_state() == RTCPeerConnectionState::Closed {
            return Err(Error::PeerClosed);
        }
        let sample = Sample {
            data: data.clone(),
            duration: self.sample_duration,
            ..Default::default()
        };
        block_on(&self.handle, self.track.write_sample(&sample))?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let current_thread = Handle::try_current()
            .map(|h| h.runtime_flavor() == RuntimeFlavor::CurrentThread)
            .unwrap_or(false);
        if current_thread {
            let pc = self.pc.clone();
            self.handle.spawn(async move {
                if let Err(e) = pc.close().await {
                    log::warn!("Error while closing peer connection: {}", e);
                }
            });
            return Ok(());
        }
        block_on(&self.handle, self.pc.close())?;
        Ok(())
    }
}
