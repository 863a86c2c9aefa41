//! Client-side transport: discovery, connect/subscribe, the turnaround-
//! latency heartbeat, and the frame-number watchdog.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::RngCore;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use streamcast_engines::{AudioCodec, AudioFormat, EventValue, StreamId, VideoCodec, VideoInitParams};

use crate::cipher::SessionCipher;
use crate::config::Config;
use crate::dispatch::{AudioDispatcher, VideoDispatcher};
use crate::error::{StreamError, StreamResult};
use crate::events::{EventEmitter, NetworkEvent, PipelineEvent};
use crate::input::ControllerManager;
use crate::net::DatagramSocket;
use crate::pipeline::{AudioReceiverPipeline, VideoReceiverPipeline};
use crate::protocol::fragment::{AdaptiveSizer, DEFAULT_MAX_FRAGMENT_SIZE};
use crate::protocol::message::{
    decode_message, encode_message, ControllerEvent, ControllerEventBatch, DiscoveryRequest, DiscoveryResponse,
    ForceIdrRequest, HelloRequest, Message, ReadyAck, StreamSubscription, TurnaroundLatency,
};
use crate::protocol::wire::{Fragment, FragmentHeader, FLAG_LAST_FRAGMENT, FLAG_SIZE_ANNOUNCE, PROTOCOL_VERSION};
use crate::protocol::Reassembler;
use crate::runtime::TaskSpawner;
use crate::stats::StatsManager;

use super::server::CHANNEL_SERVICE;

/// Whether a discovery scan should keep waiting for more replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryDecision {
    Continue,
    Abort,
}

/// Sends a single DISCOVERY probe to every candidate address and collects
/// replies for up to `window`, calling `on_found` for each one. Returning
/// [`DiscoveryDecision::Abort`] from the callback stops the scan early.
///
/// # Errors
///
/// Returns a `StreamError` if sending the probe or reading a reply fails for
/// a reason other than the scan window elapsing.
pub async fn discover(
    socket: &DatagramSocket,
    candidates: &[SocketAddr],
    device_id: &str,
    window: Duration,
    mut on_found: impl FnMut(&DiscoveryResponse, SocketAddr) -> DiscoveryDecision,
) -> StreamResult<Vec<(SocketAddr, DiscoveryResponse)>> {
    let request = Message::Discovery(DiscoveryRequest { device_id: device_id.to_string() });
    let datagram = unframed_datagram(&request)?;
    for &addr in candidates {
        socket.send_to(&datagram, addr).await?;
    }

    let mut found = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, socket.recv_from(DEFAULT_MAX_FRAGMENT_SIZE)).await {
            Ok(Ok((datagram, peer))) => {
                let Ok(fragment) = Fragment::from_datagram(datagram) else { continue };
                let Ok(Message::HelloOk(response)) = decode_message(&fragment.payload) else { continue };
                let decision = on_found(&response, peer);
                found.push((peer, response));
                if decision == DiscoveryDecision::Abort {
                    break;
                }
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => break,
        }
    }
    Ok(found)
}

fn unframed_datagram(message: &Message) -> StreamResult<Bytes> {
    let payload = encode_message(message)?;
    let fragment = Fragment {
        header: FragmentHeader {
            version: PROTOCOL_VERSION,
            channel: CHANNEL_SERVICE,
            msg_id: 0,
            fragment_index: 0,
            fragment_count: 1,
            flags: FLAG_LAST_FRAGMENT,
        },
        payload: Bytes::from(payload),
    };
    Ok(fragment.to_datagram())
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as i64)
}

/// Client-side transport: one connection to one server, with its own
/// dispatch tables, framing state, heartbeat, and watchdog.
pub struct ClientTransport {
    socket: Arc<DatagramSocket>,
    server_addr: SocketAddr,
    config: Config,
    cipher: Option<SessionCipher>,
    video: VideoDispatcher,
    audio: AudioDispatcher,
    controllers: Option<Arc<ControllerManager>>,
    reassembler: Mutex<Reassembler>,
    sizer: Mutex<AdaptiveSizer>,
    send_msg_id: AtomicU32,
    send_lock: AsyncMutex<()>,
    stats: StatsManager,
    subscribed: DashMap<StreamId, ()>,
    last_frame_seen: DashMap<StreamId, Mutex<Instant>>,
    last_force_idr: DashMap<StreamId, Mutex<Instant>>,
    emitter: Arc<dyn EventEmitter>,
    cancel: CancellationToken,
}

impl ClientTransport {
    /// Sends HELLO and awaits HELLO_OK/HELLO_REFUSED, installing the session
    /// cipher if the configured passphrase is non-empty.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionRefused` if the server rejects the HELLO, `Timeout`
    /// if no reply arrives within 5 seconds, or `InvalidArg` for a malformed
    /// or out-of-sequence reply.
    pub async fn connect(
        socket: DatagramSocket,
        server_addr: SocketAddr,
        config: Config,
        device_id: String,
        role: &str,
        platform: String,
        controllers: Option<Arc<ControllerManager>>,
        emitter: Arc<dyn EventEmitter>,
    ) -> StreamResult<(Arc<Self>, DiscoveryResponse)> {
        let salt = if config.passphrase.is_empty() {
            None
        } else {
            let mut salt = vec![0u8; 16];
            rand::rng().fill_bytes(&mut salt);
            Some(salt)
        };

        let hello = Message::Hello(HelloRequest {
            device_id,
            role: role.to_string(),
            platform,
            cipher_salt: salt.clone(),
        });
        socket.send_to(&unframed_datagram(&hello)?, server_addr).await?;

        let (datagram, peer) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(DEFAULT_MAX_FRAGMENT_SIZE))
            .await
            .map_err(|_| StreamError::Timeout("no reply to HELLO".into()))??;
        if peer != server_addr {
            return Err(StreamError::InvalidArg("HELLO reply from unexpected peer".into()));
        }
        let fragment = Fragment::from_datagram(datagram)?;
        let response = match decode_message(&fragment.payload)? {
            Message::HelloOk(response) => response,
            Message::HelloRefused(body) => return Err(StreamError::ConnectionRefused(body.reason)),
            other => return Err(StreamError::InvalidArg(format!("unexpected HELLO reply {other:?}"))),
        };

        let cipher = if config.passphrase.is_empty() {
            None
        } else {
            Some(SessionCipher::derive(&config.passphrase, salt.as_deref()))
        };

        let transport = Arc::new(Self {
            socket: Arc::new(socket),
            server_addr,
            sizer: Mutex::new(AdaptiveSizer::new(&config.fragment)),
            reassembler: Mutex::new(Reassembler::new(&config.fragment)),
            cipher,
            video: VideoDispatcher::new(),
            audio: AudioDispatcher::new(),
            controllers,
            send_msg_id: AtomicU32::new(1),
            send_lock: AsyncMutex::new(()),
            stats: StatsManager::new(),
            subscribed: DashMap::new(),
            last_frame_seen: DashMap::new(),
            last_force_idr: DashMap::new(),
            emitter,
            cancel: CancellationToken::new(),
            config,
        });
        Ok((transport, response))
    }

    #[must_use]
    pub fn stats(&self) -> &StatsManager {
        &self.stats
    }

    #[must_use]
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Registers (or replaces) the decode pipeline driving `stream_id`'s
    /// video.
    pub fn register_video_pipeline(&self, stream_id: StreamId, pipeline: VideoReceiverPipeline) {
        self.video.register(stream_id, pipeline);
    }

    /// Registers (or replaces) the decode pipeline driving `stream_id`'s
    /// audio.
    pub fn register_audio_pipeline(&self, stream_id: StreamId, pipeline: AudioReceiverPipeline) {
        self.audio.register(stream_id, pipeline);
    }

    /// Spawns the receive loop, heartbeat, and watchdog on `spawner`.
    pub fn spawn(self: &Arc<Self>, spawner: &dyn TaskSpawner) {
        let recv = self.clone();
        spawner.spawn(async move {
            if let Err(e) = recv.run().await {
                log::error!("client transport receive loop exited: {e}");
            }
        });

        let heartbeat = self.clone();
        spawner.spawn(async move { heartbeat.run_heartbeat().await });

        let watchdog = self.clone();
        spawner.spawn(async move { watchdog.run_watchdog().await });
    }

    /// Signals every background loop to exit.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Subscribes to `stream_id`: marks it as watched locally and sends
    /// `SUBSCRIBE` to the server.
    pub async fn subscribe(&self, stream_id: StreamId) -> StreamResult<()> {
        self.subscribed.insert(stream_id, ());
        self.mark_frame_seen(stream_id);
        self.send_message(CHANNEL_SERVICE, &Message::Subscribe(StreamSubscription { stream_id })).await
    }

    /// Unsubscribes from `stream_id`.
    pub async fn unsubscribe(&self, stream_id: StreamId) -> StreamResult<()> {
        self.subscribed.remove(&stream_id);
        self.last_frame_seen.remove(&stream_id);
        self.send_message(CHANNEL_SERVICE, &Message::Unsubscribe(StreamSubscription { stream_id })).await
    }

    /// Sends one batch of local input events to the server.
    pub async fn send_input(&self, events: ControllerEventBatch) -> StreamResult<()> {
        self.send_message(CHANNEL_SERVICE, &Message::SensorsIn(events)).await
    }

    /// Explicitly requests a key frame for `stream_id`.
    pub async fn force_idr(&self, stream_id: StreamId) -> StreamResult<()> {
        self.stats.record_key_frame_requested();
        self.send_message(CHANNEL_SERVICE, &Message::ForceIdr(ForceIdrRequest { stream_id })).await
    }

    async fn run(self: Arc<Self>) -> StreamResult<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                received = self.socket.recv_from(self.config.fragment.max_fragment_size) => {
                    let (datagram, peer) = received?;
                    if peer != self.server_addr {
                        continue;
                    }
                    if let Err(e) = self.handle_datagram(datagram).await {
                        self.stats.record_frame_dropped();
                        log::warn!("dropping malformed datagram from server: {e}");
                    }
                }
            }
        }
    }

    async fn handle_datagram(&self, datagram: Bytes) -> StreamResult<()> {
        let fragment = Fragment::from_datagram(datagram)?;

        if fragment.header.flags & crate::protocol::wire::FLAG_RETRANSMIT == 0 {
            let stale = self.reassembler.lock().stale_pending(Duration::from_millis(150));
            for (stale_channel, stale_msg_id) in stale {
                let missing = self.reassembler.lock().missing_fragments(stale_channel, stale_msg_id);
                if !missing.is_empty() {
                    let nack =
                        Message::Nack { stream_id: StreamId::DEFAULT, msg_id: stale_msg_id, missing };
                    if let Err(e) = self.send_message(stale_channel, &nack).await {
                        log::warn!("failed to send NACK: {e}");
                    }
                }
            }
        }

        let channel = fragment.header.channel;
        if fragment.header.flags & FLAG_SIZE_ANNOUNCE != 0 {
            self.emitter.emit_network(NetworkEvent::FragmentSizeChanged {
                session: crate::session::SessionHandle::new(0),
                new_size: fragment.payload.len() as u32,
                timestamp: now_millis(),
            });
        }

        let assembled = self.reassembler.lock().push(fragment)?;
        let Some(payload) = assembled else { return Ok(()) };

        let plaintext = match &self.cipher {
            Some(cipher) => cipher.decrypt(&payload)?,
            None => payload.to_vec(),
        };
        self.stats.record_frame_received(channel, plaintext.len() as u64);

        let message = decode_message(&plaintext)?;
        self.dispatch_server_message(message).await
    }

    async fn dispatch_server_message(&self, message: Message) -> StreamResult<()> {
        match message {
            Message::VideoInit { header, extradata } => {
                let stream_id = header.stream_id;
                let init_id = header.init_id;
                let codec = VideoCodec::parse(&header.codec)
                    .ok_or_else(|| StreamError::InvalidArg(format!("unknown video codec {}", header.codec)))?;
                let params = VideoInitParams {
                    codec,
                    resolution: (header.resolution.w, header.resolution.h),
                    viewport: header.viewport,
                    bit_depth: header.bit_depth,
                    init_block: extradata,
                };
                let reinit = self.video.with_pipeline(stream_id, |pipeline| pipeline.on_input_changed(init_id, &params))?;
                if reinit {
                    self.emitter.emit_pipeline(PipelineEvent::VideoReinit {
                        session: crate::session::SessionHandle::new(0),
                        init_id: init_id.0,
                        timestamp: now_millis(),
                    });
                }
                self.mark_frame_seen(stream_id);
                self.send_message(CHANNEL_SERVICE, &Message::Ready(ReadyAck { stream_id, init_id })).await
            }
            Message::AudioInit { header, extradata } => {
                let stream_id = header.stream_id;
                let init_id = header.init_id;
                let codec = AudioCodec::parse(&header.codec)
                    .ok_or_else(|| StreamError::InvalidArg(format!("unknown audio codec {}", header.codec)))?;
                let format = AudioFormat {
                    sample_rate: header.sampling_rate,
                    channels: header.channels,
                    bits_per_sample: 16,
                };
                let _ = extradata;
                let reinit = self.audio.with_pipeline(stream_id, |pipeline| pipeline.on_input_changed(init_id, codec, format))?;
                if reinit {
                    self.emitter.emit_pipeline(PipelineEvent::AudioReinit {
                        session: crate::session::SessionHandle::new(0),
                        init_id: init_id.0,
                        timestamp: now_millis(),
                    });
                }
                self.send_message(CHANNEL_SERVICE, &Message::Ready(ReadyAck { stream_id, init_id })).await
            }
            Message::VideoFrame { header, payload } => {
                let stream_id = header.stream_id;
                let frame_header = (&header).into();
                let client_timestamp = now_millis();
                self.mark_frame_seen(stream_id);
                let stats = &self.stats;
                self.video.with_pipeline(stream_id, |pipeline| {
                    pipeline.submit_fragment(&payload, frame_header, client_timestamp, |tagged| {
                        stats.set_full_latency_ms(tagged.client_timestamp - tagged.origin_pts);
                        stats.set_client_latency_ms(tagged.client_timestamp - tagged.pts);
                    })
                })
            }
            Message::AudioFrame { header, payload } => {
                let stream_id = header.stream_id;
                let frame_header = (&header).into();
                let stats = &self.stats;
                let emitter = &self.emitter;
                self.audio.with_pipeline(stream_id, |pipeline| {
                    pipeline.submit_packet(&payload, frame_header, |decision, desync_ms| {
                        stats.set_av_desync_ms(desync_ms);
                        if decision == crate::pipeline::sync::SyncDecision::Drop {
                            stats.record_audio_packet_dropped();
                            emitter.emit_pipeline(PipelineEvent::AudioPacketsDropped {
                                session: crate::session::SessionHandle::new(0),
                                count: 1,
                                timestamp: now_millis(),
                            });
                        }
                    })
                })
            }
            Message::SensorsOut(batch) => {
                if let Some(controllers) = &self.controllers {
                    let events: Vec<(String, EventValue)> = batch.into_iter().map(|e| (e.id, e.value)).collect();
                    controllers.dispatch_batch(&events);
                }
                Ok(())
            }
            Message::Stats(_) | Message::HelloOk(_) => Ok(()),
            other => Err(StreamError::InvalidArg(format!("unexpected server message {other:?}"))),
        }
    }

    fn mark_frame_seen(&self, stream_id: StreamId) {
        match self.last_frame_seen.get(&stream_id) {
            Some(entry) => *entry.value().lock() = Instant::now(),
            None => {
                self.last_frame_seen.insert(stream_id, Mutex::new(Instant::now()));
            }
        }
    }

    async fn run_heartbeat(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {
                    // Rolled here for symmetry with the server's session
                    // monitor; in practice this client never calls
                    // record_loss() (NACKs only flow client -> server), so
                    // the window only ever reports zero loss.
                    self.sizer.lock().tick();

                    let body = TurnaroundLatency { client_send_ts: now_millis() };
                    if let Err(e) = self.send_message(CHANNEL_SERVICE, &Message::TurnaroundLatency(body)).await {
                        log::warn!("heartbeat send failed: {e}");
                    }
                }
            }
        }
    }

    /// Watches every subscribed stream for stalled frame delivery. A stream
    /// with no new frame for `frame_watchdog_timeout_ms` gets a `FORCE_IDR`
    /// request, throttled to at most one per `frame_watchdog_cooloff_ms` so a
    /// persistently stuck stream doesn't flood the server.
    async fn run_watchdog(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(250));
        let timeout = Duration::from_millis(self.config.frame_watchdog_timeout_ms);
        let cooloff = Duration::from_millis(self.config.frame_watchdog_cooloff_ms);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => self.check_watchdog(timeout, cooloff).await,
            }
        }
    }

    async fn check_watchdog(&self, timeout: Duration, cooloff: Duration) {
        let stalled: Vec<StreamId> = self
            .subscribed
            .iter()
            .filter_map(|entry| {
                let stream_id = *entry.key();
                let last_seen = self.last_frame_seen.get(&stream_id)?;
                if last_seen.value().lock().elapsed() > timeout {
                    Some(stream_id)
                } else {
                    None
                }
            })
            .collect();

        for stream_id in stalled {
            let should_request = {
                let mut last_request = self
                    .last_force_idr
                    .entry(stream_id)
                    .or_insert_with(|| Mutex::new(Instant::now().checked_sub(cooloff).unwrap_or_else(Instant::now)));
                let mut guard = last_request.value_mut().lock();
                if guard.elapsed() >= cooloff {
                    *guard = Instant::now();
                    true
                } else {
                    false
                }
            };
            if should_request {
                self.emitter.emit_network(NetworkEvent::FrameWatchdogTripped {
                    session: crate::session::SessionHandle::new(0),
                    timestamp: now_millis(),
                });
                if let Err(e) = self.force_idr(stream_id).await {
                    log::warn!("watchdog FORCE_IDR for stream {stream_id} failed: {e}");
                }
            }
        }
    }

    async fn send_message(&self, channel: u8, message: &Message) -> StreamResult<()> {
        let _guard = self.send_lock.lock().await;

        let plaintext = encode_message(message)?;
        self.stats.record_frame_sent(channel, plaintext.len() as u64);
        let wire = match &self.cipher {
            Some(cipher) => cipher.encrypt(&plaintext)?,
            None => plaintext,
        };

        let msg_id = self.send_msg_id.fetch_add(1, Ordering::Relaxed);
        let max_fragment_size = self.sizer.lock().current_size();
        self.stats.set_current_fragment_size(max_fragment_size as u64);
        let fragments = crate::protocol::fragment::split_message(channel, msg_id, &wire, max_fragment_size);

        let send_start = Instant::now();
        for fragment in &fragments {
            self.socket.send_to(&fragment.to_datagram(), self.server_addr).await?;
        }
        self.stats.record_send_time_us(send_start.elapsed().as_micros() as u64);
        Ok(())
    }
}

/// Convenience constructor for one outgoing controller event, used by
/// callers translating local input into a `SensorsIn` batch entry.
#[must_use]
pub fn controller_event(id: impl Into<String>, value: EventValue) -> ControllerEvent {
    ControllerEvent { id: id.into(), value, flags: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.passphrase = "test-passphrase".to_string();
        config
    }

    async fn connected_pair() -> (Arc<ClientTransport>, DatagramSocket, SocketAddr) {
        let server_socket = DatagramSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let server_addr = server_socket.local_addr().unwrap();
        let client_socket = DatagramSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let connect_task = tokio::spawn(ClientTransport::connect(
            client_socket,
            server_addr,
            config(),
            "client-1".to_string(),
            "viewer",
            "test".to_string(),
            None,
            Arc::new(crate::events::NoopEventEmitter),
        ));

        let (datagram, peer) = server_socket.recv_from(DEFAULT_MAX_FRAGMENT_SIZE).await.unwrap();
        let fragment = Fragment::from_datagram(datagram).unwrap();
        assert!(matches!(decode_message(&fragment.payload).unwrap(), Message::Hello(_)));

        let response = Message::HelloOk(DiscoveryResponse { server_name: "srv".to_string(), streams: vec![] });
        server_socket.send_to(&unframed_datagram(&response).unwrap(), peer).await.unwrap();

        let (transport, _response) = connect_task.await.unwrap().unwrap();
        (transport, server_socket, peer)
    }

    #[tokio::test]
    async fn connect_installs_a_cipher_when_passphrase_is_configured() {
        let (transport, _server, _peer) = connected_pair().await;
        assert!(transport.cipher.is_some());
    }

    #[tokio::test]
    async fn connect_surfaces_hello_refused_as_connection_refused() {
        let server_socket = DatagramSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let server_addr = server_socket.local_addr().unwrap();
        let client_socket = DatagramSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let connect_task = tokio::spawn(ClientTransport::connect(
            client_socket,
            server_addr,
            config(),
            "client-1".to_string(),
            "viewer",
            "test".to_string(),
            None,
            Arc::new(crate::events::NoopEventEmitter),
        ));

        let (_datagram, peer) = server_socket.recv_from(DEFAULT_MAX_FRAGMENT_SIZE).await.unwrap();
        let refusal = Message::HelloRefused(crate::protocol::message::HelloRefusedBody { reason: "full".to_string() });
        server_socket.send_to(&unframed_datagram(&refusal).unwrap(), peer).await.unwrap();

        let err = connect_task.await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::ConnectionRefused(reason) if reason == "full"));
    }

    #[tokio::test]
    async fn subscribe_sends_a_subscribe_message_and_marks_the_stream_watched() {
        let (transport, server, _peer) = connected_pair().await;
        transport.subscribe(StreamId::DEFAULT).await.unwrap();

        let (datagram, _peer) = server.recv_from(DEFAULT_MAX_FRAGMENT_SIZE).await.unwrap();
        let fragment = Fragment::from_datagram(datagram).unwrap();
        let plaintext = transport.cipher.as_ref().unwrap().decrypt(&fragment.payload).unwrap();
        assert!(matches!(decode_message(&plaintext).unwrap(), Message::Subscribe(_)));
        assert!(transport.last_frame_seen.contains_key(&StreamId::DEFAULT));
    }

    #[tokio::test]
    async fn watchdog_requests_force_idr_for_a_stalled_subscribed_stream() {
        let (transport, server, _peer) = connected_pair().await;
        transport.subscribed.insert(StreamId::DEFAULT, ());
        transport
            .last_frame_seen
            .insert(StreamId::DEFAULT, Mutex::new(Instant::now() - Duration::from_secs(10)));

        transport.check_watchdog(Duration::from_millis(1), Duration::from_secs(60)).await;

        let (datagram, _peer) = server.recv_from(DEFAULT_MAX_FRAGMENT_SIZE).await.unwrap();
        let fragment = Fragment::from_datagram(datagram).unwrap();
        let plaintext = transport.cipher.as_ref().unwrap().decrypt(&fragment.payload).unwrap();
        assert!(matches!(decode_message(&plaintext).unwrap(), Message::ForceIdr(_)));
    }

    #[tokio::test]
    async fn watchdog_cooloff_suppresses_a_second_immediate_request() {
        let (transport, server, _peer) = connected_pair().await;
        transport.subscribed.insert(StreamId::DEFAULT, ());
        transport
            .last_frame_seen
            .insert(StreamId::DEFAULT, Mutex::new(Instant::now() - Duration::from_secs(10)));

        transport.check_watchdog(Duration::from_millis(1), Duration::from_secs(60)).await;
        let _ = server.recv_from(DEFAULT_MAX_FRAGMENT_SIZE).await.unwrap();

        transport.check_watchdog(Duration::from_millis(1), Duration::from_secs(60)).await;
        let second = tokio::time::timeout(Duration::from_millis(50), server.recv_from(DEFAULT_MAX_FRAGMENT_SIZE)).await;
        assert!(second.is_err(), "cooled-down watchdog must not resend immediately");
    }
}
