//! Server-side transport: discovery/HELLO authorization, subscriber and
//! subscription management, per-init frame gating, and NACK/force-key-frame
//! handling.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use streamcast_engines::{InitId, StreamId};

use crate::cipher::SessionCipher;
use crate::config::Config;
use crate::dispatch::InitBlockCache;
use crate::error::{StreamError, StreamResult};
use crate::events::{EventEmitter, NetworkEvent, PipelineEvent};
use crate::input::ControllerManager;
use crate::net::DatagramSocket;
use crate::protocol::fragment::AdaptiveSizer;
use crate::protocol::message::{
    decode_message, encode_message, AudioFrameHeader, AudioInitHeader, DiscoveryRequest, DiscoveryResponse,
    HelloRefusedBody, HelloRequest, Message, StreamDescriptor, VideoFrameHeader, VideoInitHeader,
};
use crate::protocol::wire::Fragment;
use crate::protocol::Reassembler;
use crate::runtime::TaskSpawner;
use crate::session::{Session, SessionHandle, SessionManager, SessionRole};
use crate::stats::StatsManager;

/// SERVICE-channel messages: discovery, handshake, subscription control,
/// NACK, turnaround latency, controller events.
pub const CHANNEL_SERVICE: u8 = 0;
/// Video init/frame messages.
pub const CHANNEL_VIDEO: u8 = 1;
/// Audio init/frame messages.
pub const CHANNEL_AUDIO: u8 = 2;

/// Requests from multiple subscribers for the same stream within this window
/// coalesce into a single upstream `KeyFrameRequested` emission.
const FORCE_IDR_COALESCE_WINDOW: Duration = Duration::from_millis(200);

/// Decides whether a discovery probe gets a reply.
pub trait DiscoveryAuthorizer: Send + Sync {
    fn authorize(&self, request: &DiscoveryRequest, peer: SocketAddr) -> bool;
}

/// Allows every discovery probe - the default for a server with no access
/// control configured.
pub struct AllowAllDiscovery;

impl DiscoveryAuthorizer for AllowAllDiscovery {
    fn authorize(&self, _request: &DiscoveryRequest, _peer: SocketAddr) -> bool {
        true
    }
}

/// Decides whether a HELLO connect request is accepted, and if not, the
/// refusal reason sent back to the client.
pub trait ConnectionAuthorizer: Send + Sync {
    fn authorize(&self, request: &HelloRequest, peer: SocketAddr) -> Result<(), String>;
}

/// Accepts every HELLO - the default for a server with no access control
/// configured.
pub struct AllowAllConnections;

impl ConnectionAuthorizer for AllowAllConnections {
    fn authorize(&self, _request: &HelloRequest, _peer: SocketAddr) -> Result<(), String> {
        Ok(())
    }
}

/// Bounded cache of recently sent fragments, keyed by (channel, msgID), kept
/// just long enough to serve a selective NACK retransmit. Eviction mirrors
/// `Reassembler`'s age + capacity bound.
struct RetransmitCache {
    window: Duration,
    max_entries: usize,
    entries: HashMap<(u8, u32), (Instant, Vec<Fragment>)>,
}

impl RetransmitCache {
    fn new(window: Duration, max_entries: usize) -> Self {
        Self { window, max_entries, entries: HashMap::new() }
    }

    fn insert(&mut self, channel: u8, msg_id: u32, fragments: Vec<Fragment>) {
        self.entries.retain(|_, (seen, _)| seen.elapsed() < self.window);
        if self.entries.len() >= self.max_entries {
            if let Some(oldest) = self.entries.iter().min_by_key(|(_, (seen, _))| *seen).map(|(k, _)| *k) {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert((channel, msg_id), (Instant::now(), fragments));
    }

    fn fragments_for(&self, channel: u8, msg_id: u32, missing: &[u16]) -> Vec<Fragment> {
        self.entries
            .get(&(channel, msg_id))
            .map(|(_, fragments)| {
                fragments
                    .iter()
                    .filter(|f| missing.contains(&f.header.fragment_index))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One connected peer: its session, subscriptions, and per-peer framing
/// state.
pub struct Subscriber {
    pub session: Arc<Session>,
    pub addr: SocketAddr,
    pub device_id: String,
    subscriptions: DashMap<StreamId, InitId>,
    send_msg_id: AtomicU32,
    reassembler: parking_lot::Mutex<Reassembler>,
    sizer: parking_lot::Mutex<AdaptiveSizer>,
    outgoing: parking_lot::Mutex<RetransmitCache>,
    send_lock: AsyncMutex<()>,
    stats: StatsManager,
    /// Set by the session monitor when [`AdaptiveSizer::tick`] changes this
    /// subscriber's fragment size; cleared once the change has been
    /// announced in-band via `FLAG_SIZE_ANNOUNCE` on the next send.
    pending_size_announce: std::sync::atomic::AtomicBool,
}

impl Subscriber {
    fn new(session: Arc<Session>, addr: SocketAddr, device_id: String, config: &Config) -> Self {
        Self {
            session,
            addr,
            device_id,
            subscriptions: DashMap::new(),
            send_msg_id: AtomicU32::new(1),
            reassembler: parking_lot::Mutex::new(Reassembler::new(&config.fragment)),
            sizer: parking_lot::Mutex::new(AdaptiveSizer::new(&config.fragment)),
            outgoing: parking_lot::Mutex::new(RetransmitCache::new(
                Duration::from_secs(config.fragment.reassembly_window_secs),
                config.fragment.max_incomplete_per_session,
            )),
            send_lock: AsyncMutex::new(()),
            stats: StatsManager::new(),
            pending_size_announce: std::sync::atomic::AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn stats(&self) -> &StatsManager {
        &self.stats
    }

    #[must_use]
    pub fn is_subscribed(&self, stream_id: StreamId) -> bool {
        self.subscriptions.contains_key(&stream_id)
    }

    fn subscribe(&self, stream_id: StreamId) {
        self.subscriptions.entry(stream_id).or_insert(InitId::NONE);
    }

    fn unsubscribe(&self, stream_id: StreamId) {
        self.subscriptions.remove(&stream_id);
    }

    fn ack_init(&self, stream_id: StreamId, init_id: InitId) {
        if let Some(mut entry) = self.subscriptions.get_mut(&stream_id) {
            *entry = init_id;
        }
    }

    fn last_acked_init(&self, stream_id: StreamId) -> InitId {
        self.subscriptions.get(&stream_id).map_or(InitId::NONE, |entry| *entry)
    }

    fn next_msg_id(&self) -> u32 {
        self.send_msg_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Server-side transport: owns every live subscriber, the advertised stream
/// list, and the per-stream init block cache used for resend gating.
pub struct ServerTransport {
    socket: Arc<DatagramSocket>,
    sessions: SessionManager,
    subscribers: DashMap<SessionHandle, Arc<Subscriber>>,
    by_addr: DashMap<SocketAddr, SessionHandle>,
    video_init: InitBlockCache,
    audio_init: InitBlockCache,
    streams: DashMap<StreamId, StreamDescriptor>,
    config: Config,
    server_name: String,
    connection_authorizer: Box<dyn ConnectionAuthorizer>,
    discovery_authorizer: Box<dyn DiscoveryAuthorizer>,
    controllers: Option<Arc<ControllerManager>>,
    emitter: Arc<dyn EventEmitter>,
    /// Last upstream FORCE_IDR emission per stream, for coalescing bursts of
    /// requests from multiple subscribers of the same stream within
    /// [`FORCE_IDR_COALESCE_WINDOW`] into a single upstream call.
    last_force_idr: DashMap<StreamId, parking_lot::Mutex<Instant>>,
    cancel: CancellationToken,
}

impl ServerTransport {
    #[must_use]
    pub fn new(
        socket: DatagramSocket,
        config: Config,
        server_name: String,
        connection_authorizer: Box<dyn ConnectionAuthorizer>,
        discovery_authorizer: Box<dyn DiscoveryAuthorizer>,
        controllers: Option<Arc<ControllerManager>>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        let session_timeout = Duration::from_secs(config.session_timeout_secs);
        Self {
            socket: Arc::new(socket),
            sessions: SessionManager::new(session_timeout, emitter.clone()),
            subscribers: DashMap::new(),
            by_addr: DashMap::new(),
            video_init: InitBlockCache::new(),
            audio_init: InitBlockCache::new(),
            streams: DashMap::new(),
            config,
            server_name,
            connection_authorizer,
            discovery_authorizer,
            controllers,
            emitter,
            last_force_idr: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn local_addr(&self) -> StreamResult<SocketAddr> {
        self.socket.local_addr()
    }

    /// Adds (or replaces) a stream in the discovery-reply advertisement.
    pub fn advertise_stream(&self, descriptor: StreamDescriptor) {
        self.streams.insert(descriptor.id, descriptor);
    }

    #[must_use]
    pub fn active_subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Spawns the receive loop and the session-tick/reaper loop on `spawner`.
    pub fn spawn(self: &Arc<Self>, spawner: &dyn TaskSpawner) {
        let recv = self.clone();
        spawner.spawn(async move {
            if let Err(e) = recv.run().await {
                log::error!("server transport receive loop exited: {e}");
            }
        });

        let tick = self.clone();
        spawner.spawn(async move {
            tick.run_session_monitor().await;
        });
    }

    /// Signals both background loops to exit.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    async fn run(self: Arc<Self>) -> StreamResult<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                received = self.socket.recv_from(self.config.fragment.max_fragment_size) => {
                    let (datagram, peer) = received?;
                    if let Err(e) = self.handle_datagram(datagram, peer).await {
                        log::warn!("dropping malformed datagram from {peer}: {e}");
                    }
                }
            }
        }
    }

    /// Per-session tick cadence: advances timed-out sessions, reaps their
    /// subscriber state, and rolls each subscriber's adaptive fragment-size
    /// window - on the same 1ms cadence as the acceptor's own tick.
    async fn run_session_monitor(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(1));
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {
                    self.sessions.tick();
                    self.reap_expired();
                    self.tick_adaptive_sizers();
                }
            }
        }
    }

    /// Rolls every connected subscriber's loss window forward, announcing
    /// any resulting fragment-size change in-band on the subscriber's next
    /// send and as a [`NetworkEvent::FragmentSizeChanged`].
    fn tick_adaptive_sizers(&self) {
        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if let Some(new_size) = subscriber.sizer.lock().tick() {
                subscriber.pending_size_announce.store(true, Ordering::Relaxed);
                self.emitter.emit_network(NetworkEvent::FragmentSizeChanged {
                    session: subscriber.session.handle,
                    new_size,
                    timestamp: 0,
                });
            }
        }
    }

    /// Decides whether a FORCE_IDR for `stream_id` should actually reach the
    /// pipeline, coalescing requests from multiple subscribers of the same
    /// stream within [`FORCE_IDR_COALESCE_WINDOW`] into one upstream call.
    fn should_emit_force_idr(&self, stream_id: StreamId) -> bool {
        let mut last_request = self
            .last_force_idr
            .entry(stream_id)
            .or_insert_with(|| parking_lot::Mutex::new(Instant::now().checked_sub(FORCE_IDR_COALESCE_WINDOW).unwrap_or_else(Instant::now)));
        let mut guard = last_request.value_mut().lock();
        if guard.elapsed() >= FORCE_IDR_COALESCE_WINDOW {
            *guard = Instant::now();
            true
        } else {
            false
        }
    }

    fn reap_expired(&self) {
        let expired: Vec<SessionHandle> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().session.state() == crate::session::SessionState::TimedOut)
            .map(|entry| *entry.key())
            .collect();

        for handle in expired {
            if let Some((_, subscriber)) = self.subscribers.remove(&handle) {
                self.by_addr.remove(&subscriber.addr);
                if let Some(controllers) = &self.controllers {
                    controllers.on_disconnect();
                }
            }
            let _ = self.sessions.terminate(handle);
        }
    }

    async fn handle_datagram(&self, datagram: Bytes, peer: SocketAddr) -> StreamResult<()> {
        let fragment = Fragment::from_datagram(datagram)?;

        let subscriber = self.by_addr.get(&peer).and_then(|entry| self.subscribers.get(&*entry).map(|s| s.value().clone()));

        match subscriber {
            Some(subscriber) => {
                let result = self.handle_session_fragment(&subscriber, fragment).await;
                if result.is_err() {
                    subscriber.stats().record_frame_dropped();
                }
                result
            }
            None => self.handle_pre_session_fragment(fragment, peer).await,
        }
    }

    async fn handle_pre_session_fragment(&self, fragment: Fragment, peer: SocketAddr) -> StreamResult<()> {
        if fragment.header.fragment_count != 1 {
            return Err(StreamError::InvalidArg("pre-session messages must not be fragmented".into()));
        }
        match decode_message(&fragment.payload)? {
            Message::Discovery(request) => self.handle_discovery(request, peer).await,
            Message::Hello(request) => self.handle_hello(request, peer).await,
            other => Err(StreamError::InvalidArg(format!("unexpected pre-session message {other:?}"))),
        }
    }

    async fn handle_discovery(&self, request: DiscoveryRequest, peer: SocketAddr) -> StreamResult<()> {
        if !self.discovery_authorizer.authorize(&request, peer) {
            return Ok(());
        }
        let streams = self.streams.iter().map(|entry| entry.value().clone()).collect();
        let response = Message::HelloOk(DiscoveryResponse { server_name: self.server_name.clone(), streams });
        self.send_unframed(peer, &response).await
    }

    async fn handle_hello(&self, request: HelloRequest, peer: SocketAddr) -> StreamResult<()> {
        if let Err(reason) = self.connection_authorizer.authorize(&request, peer) {
            let refusal = Message::HelloRefused(HelloRefusedBody { reason });
            return self.send_unframed(peer, &refusal).await;
        }

        let role = if request.role == "controller" { SessionRole::Controller } else { SessionRole::Viewer };
        let session = self.sessions.create(peer.to_string(), role);
        self.sessions.begin_handshake(session.handle)?;

        if !self.config.passphrase.is_empty() {
            session.install_cipher(SessionCipher::derive(&self.config.passphrase, request.cipher_salt.as_deref()));
        }
        session.set_peer_platform(request.platform.clone());
        self.sessions.accept(session.handle)?;

        let subscriber = Arc::new(Subscriber::new(session.clone(), peer, request.device_id.clone(), &self.config));
        self.subscribers.insert(session.handle, subscriber.clone());
        self.by_addr.insert(peer, session.handle);

        let streams = self.streams.iter().map(|entry| entry.value().clone()).collect();
        let response = Message::HelloOk(DiscoveryResponse { server_name: self.server_name.clone(), streams });
        self.send_message(&subscriber, CHANNEL_SERVICE, &response).await
    }

    async fn handle_session_fragment(&self, subscriber: &Arc<Subscriber>, fragment: Fragment) -> StreamResult<()> {
        subscriber.session.touch();

        let channel = fragment.header.channel;
        let msg_id = fragment.header.msg_id;
        let assembled = subscriber.reassembler.lock().push(fragment)?;
        let Some(payload) = assembled else { return Ok(()) };

        let plaintext = match subscriber.session.cipher() {
            Some(cipher) => cipher.decrypt(&payload)?,
            None => payload.to_vec(),
        };
        subscriber.stats().record_frame_received(channel, plaintext.len() as u64);

        let message = decode_message(&plaintext)?;
        self.dispatch_client_message(subscriber, channel, msg_id, message).await
    }

    async fn dispatch_client_message(
        &self,
        subscriber: &Arc<Subscriber>,
        channel: u8,
        msg_id: u32,
        message: Message,
    ) -> StreamResult<()> {
        match message {
            Message::Subscribe(body) => {
                subscriber.subscribe(body.stream_id);
                self.resend_init_if_cached(subscriber, body.stream_id).await
            }
            Message::Unsubscribe(body) => {
                subscriber.unsubscribe(body.stream_id);
                Ok(())
            }
            Message::Ready(ack) => {
                subscriber.ack_init(ack.stream_id, ack.init_id);
                Ok(())
            }
            Message::ForceIdr(body) => {
                if self.should_emit_force_idr(body.stream_id) {
                    self.emitter.emit_pipeline(PipelineEvent::KeyFrameRequested {
                        session: subscriber.session.handle,
                        timestamp: 0,
                    });
                }
                Ok(())
            }
            Message::Nack { stream_id: _, msg_id: nacked_msg_id, missing } => {
                subscriber.sizer.lock().record_loss();
                self.retransmit(subscriber, channel, nacked_msg_id, &missing).await
            }
            Message::TurnaroundLatency(body) => {
                let _ = msg_id;
                subscriber.stats().set_last_latency_us(body.client_send_ts);
                self.emitter.emit_network(NetworkEvent::LatencyMeasured {
                    session: subscriber.session.handle,
                    latency_us: body.client_send_ts,
                    timestamp: 0,
                });
                Ok(())
            }
            Message::SensorsIn(batch) => {
                if let Some(controllers) = &self.controllers {
                    let events: Vec<(String, streamcast_engines::EventValue)> =
                        batch.into_iter().map(|e| (e.id, e.value)).collect();
                    controllers.dispatch_batch(&events);
                }
                Ok(())
            }
            other => Err(StreamError::InvalidArg(format!("unexpected client message {other:?}"))),
        }
    }

    async fn retransmit(&self, subscriber: &Arc<Subscriber>, channel: u8, msg_id: u32, missing: &[u16]) -> StreamResult<()> {
        let fragments = subscriber.outgoing.lock().fragments_for(channel, msg_id, missing);
        for mut fragment in fragments {
            fragment.header.flags |= crate::protocol::wire::FLAG_RETRANSMIT;
            self.socket.send_to(&fragment.to_datagram(), subscriber.addr).await?;
            subscriber.stats().record_fragment_retransmitted();
        }
        Ok(())
    }

    async fn resend_init_if_cached(&self, subscriber: &Arc<Subscriber>, stream_id: StreamId) -> StreamResult<()> {
        if let Some(block) = self.video_init.get(stream_id) {
            let header: VideoInitHeader = serde_json::from_slice(&block.header_json)
                .map_err(|e| StreamError::InvalidArg(format!("corrupt cached video init: {e}")))?;
            let message = Message::VideoInit { header, extradata: block.extradata.clone() };
            self.send_message(subscriber, CHANNEL_VIDEO, &message).await?;
        }
        if let Some(block) = self.audio_init.get(stream_id) {
            let header: AudioInitHeader = serde_json::from_slice(&block.header_json)
                .map_err(|e| StreamError::InvalidArg(format!("corrupt cached audio init: {e}")))?;
            let message = Message::AudioInit { header, extradata: block.extradata.clone() };
            self.send_message(subscriber, CHANNEL_AUDIO, &message).await?;
        }
        Ok(())
    }

    /// Publishes a video init block: caches it for resend gating and pushes
    /// it to every current subscriber of `stream_id`.
    pub async fn publish_video_init(&self, stream_id: StreamId, header: VideoInitHeader, extradata: Vec<u8>) -> StreamResult<()> {
        let header_json = serde_json::to_vec(&header).map_err(|e| StreamError::InvalidArg(e.to_string()))?;
        self.video_init.set(
            stream_id,
            Arc::new(crate::dispatch::InitBlock { init_id: header.init_id, header_json, extradata: extradata.clone() }),
        );
        let message = Message::VideoInit { header, extradata };
        self.broadcast_to_subscribed(stream_id, CHANNEL_VIDEO, &message).await
    }

    /// Publishes an audio init block, parallel to [`Self::publish_video_init`].
    pub async fn publish_audio_init(&self, stream_id: StreamId, header: AudioInitHeader, extradata: Vec<u8>) -> StreamResult<()> {
        let header_json = serde_json::to_vec(&header).map_err(|e| StreamError::InvalidArg(e.to_string()))?;
        self.audio_init.set(
            stream_id,
            Arc::new(crate::dispatch::InitBlock { init_id: header.init_id, header_json, extradata: extradata.clone() }),
        );
        let message = Message::AudioInit { header, extradata };
        self.broadcast_to_subscribed(stream_id, CHANNEL_AUDIO, &message).await
    }

    /// Publishes one coded video frame to every subscriber whose last-acked
    /// InitID matches the stream's current init block; subscribers still
    /// catching up get the cached init block resent instead.
    pub async fn publish_video_frame(&self, stream_id: StreamId, header: VideoFrameHeader, payload: Vec<u8>) -> StreamResult<()> {
        let current_init = self.video_init.current_init_id(stream_id);
        let message = Message::VideoFrame { header, payload };
        self.publish_gated(stream_id, CHANNEL_VIDEO, current_init, &message).await
    }

    /// Publishes one coded audio packet, parallel to [`Self::publish_video_frame`].
    pub async fn publish_audio_frame(&self, stream_id: StreamId, header: AudioFrameHeader, payload: Vec<u8>) -> StreamResult<()> {
        let current_init = self.audio_init.current_init_id(stream_id);
        let message = Message::AudioFrame { header, payload };
        self.publish_gated(stream_id, CHANNEL_AUDIO, current_init, &message).await
    }

    async fn publish_gated(&self, stream_id: StreamId, channel: u8, current_init: InitId, message: &Message) -> StreamResult<()> {
        let subscribers: Vec<Arc<Subscriber>> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().is_subscribed(stream_id))
            .map(|entry| entry.value().clone())
            .collect();

        for subscriber in subscribers {
            if subscriber.last_acked_init(stream_id) != current_init {
                if let Err(e) = self.resend_init_if_cached(&subscriber, stream_id).await {
                    log::warn!("failed to resend init block to {}: {e}", subscriber.addr);
                }
                continue;
            }
            if let Err(e) = self.send_message(&subscriber, channel, message).await {
                log::warn!("failed to publish frame to {}: {e}", subscriber.addr);
            }
        }
        Ok(())
    }

    async fn broadcast_to_subscribed(&self, stream_id: StreamId, channel: u8, message: &Message) -> StreamResult<()> {
        let subscribers: Vec<Arc<Subscriber>> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().is_subscribed(stream_id))
            .map(|entry| entry.value().clone())
            .collect();
        for subscriber in subscribers {
            if let Err(e) = self.send_message(&subscriber, channel, message).await {
                log::warn!("failed to broadcast init block to {}: {e}", subscriber.addr);
            }
        }
        Ok(())
    }

    /// Sends a message to a peer that has no session yet (discovery reply,
    /// HELLO_OK/REFUSED before a cipher, if any, exists). Always a single
    /// unfragmented, unencrypted datagram.
    async fn send_unframed(&self, peer: SocketAddr, message: &Message) -> StreamResult<()> {
        let payload = encode_message(message)?;
        let fragment = Fragment {
            header: crate::protocol::wire::FragmentHeader {
                version: crate::protocol::wire::PROTOCOL_VERSION,
                channel: CHANNEL_SERVICE,
                msg_id: 0,
                fragment_index: 0,
                fragment_count: 1,
                flags: crate::protocol::wire::FLAG_LAST_FRAGMENT,
            },
            payload: Bytes::from(payload),
        };
        self.socket.send_to(&fragment.to_datagram(), peer).await
    }

    /// Sends one message to an established subscriber: encrypts if the
    /// session has a cipher, fragments at the subscriber's current adaptive
    /// size, caches the fragments for NACK retransmission, and serializes
    /// concurrent sends to the same peer behind `send_lock`.
    async fn send_message(&self, subscriber: &Arc<Subscriber>, channel: u8, message: &Message) -> StreamResult<()> {
        let _guard = subscriber.send_lock.lock().await;

        let plaintext = encode_message(message)?;
        subscriber.stats().record_frame_sent(channel, plaintext.len() as u64);
        let wire = match subscriber.session.cipher() {
            Some(cipher) => cipher.encrypt(&plaintext)?,
            None => plaintext,
        };

        let msg_id = subscriber.next_msg_id();
        let max_fragment_size = subscriber.sizer.lock().current_size();
        subscriber.stats().set_current_fragment_size(max_fragment_size as u64);
        let mut fragments = crate::protocol::fragment::split_message(channel, msg_id, &wire, max_fragment_size);

        if subscriber.pending_size_announce.swap(false, Ordering::Relaxed) {
            for fragment in &mut fragments {
                fragment.header.flags |= crate::protocol::wire::FLAG_SIZE_ANNOUNCE;
            }
        }
        subscriber.outgoing.lock().insert(channel, msg_id, fragments.clone());

        let send_start = Instant::now();
        for fragment in &fragments {
            self.socket.send_to(&fragment.to_datagram(), subscriber.addr).await?;
        }
        subscriber.stats().record_send_time_us(send_start.elapsed().as_micros() as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::{FragmentHeader, FLAG_LAST_FRAGMENT, PROTOCOL_VERSION};

    fn config() -> Config {
        let mut config = Config::default();
        config.passphrase = "test-passphrase".to_string();
        config
    }

    async fn transport() -> Arc<ServerTransport> {
        let socket = DatagramSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        Arc::new(ServerTransport::new(
            socket,
            config(),
            "test-server".to_string(),
            Box::new(AllowAllConnections),
            Box::new(AllowAllDiscovery),
            None,
            Arc::new(crate::events::NoopEventEmitter),
        ))
    }

    #[tokio::test]
    async fn hello_creates_an_active_subscriber() {
        let transport = transport().await;
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        transport
            .handle_hello(
                HelloRequest {
                    device_id: "client-1".to_string(),
                    role: "viewer".to_string(),
                    platform: "test".to_string(),
                    cipher_salt: None,
                },
                peer,
            )
            .await
            .unwrap();

        assert_eq!(transport.active_subscriber_count(), 1);
        let handle = *transport.by_addr.get(&peer).unwrap();
        let subscriber = transport.subscribers.get(&handle).unwrap();
        assert_eq!(subscriber.session.state(), crate::session::SessionState::Active);
    }

    #[tokio::test]
    async fn refused_hello_does_not_create_a_subscriber() {
        struct DenyAll;
        impl ConnectionAuthorizer for DenyAll {
            fn authorize(&self, _request: &HelloRequest, _peer: SocketAddr) -> Result<(), String> {
                Err("denied".to_string())
            }
        }

        let socket = DatagramSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let transport = Arc::new(ServerTransport::new(
            socket,
            config(),
            "test-server".to_string(),
            Box::new(DenyAll),
            Box::new(AllowAllDiscovery),
            None,
            Arc::new(crate::events::NoopEventEmitter),
        ));

        transport
            .handle_hello(
                HelloRequest {
                    device_id: "client-1".to_string(),
                    role: "viewer".to_string(),
                    platform: "test".to_string(),
                    cipher_salt: None,
                },
                "127.0.0.1:40001".parse().unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(transport.active_subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribe_then_ready_clears_the_gate() {
        let transport = transport().await;
        let peer: SocketAddr = "127.0.0.1:40002".parse().unwrap();
        transport
            .handle_hello(
                HelloRequest { device_id: "c".to_string(), role: "viewer".to_string(), platform: "t".to_string(), cipher_salt: None },
                peer,
            )
            .await
            .unwrap();
        let handle = *transport.by_addr.get(&peer).unwrap();
        let subscriber = transport.subscribers.get(&handle).unwrap().value().clone();

        subscriber.subscribe(StreamId::DEFAULT);
        assert_eq!(subscriber.last_acked_init(StreamId::DEFAULT), InitId::NONE);

        subscriber.ack_init(StreamId::DEFAULT, InitId(5));
        assert_eq!(subscriber.last_acked_init(StreamId::DEFAULT), InitId(5));
    }

    #[tokio::test]
    async fn force_idr_requests_within_the_coalesce_window_emit_once() {
        let transport = transport().await;
        assert!(transport.should_emit_force_idr(StreamId::DEFAULT));
        assert!(!transport.should_emit_force_idr(StreamId::DEFAULT));
        assert!(!transport.should_emit_force_idr(StreamId::DEFAULT));
    }

    #[tokio::test]
    async fn force_idr_coalescing_is_independent_per_stream() {
        let transport = transport().await;
        assert!(transport.should_emit_force_idr(StreamId(1)));
        assert!(transport.should_emit_force_idr(StreamId(2)));
    }

    #[tokio::test]
    async fn nack_records_a_loss_against_the_subscriber_sizer() {
        let transport = transport().await;
        let peer: SocketAddr = "127.0.0.1:40010".parse().unwrap();
        transport
            .handle_hello(
                HelloRequest { device_id: "c".to_string(), role: "viewer".to_string(), platform: "t".to_string(), cipher_salt: None },
                peer,
            )
            .await
            .unwrap();
        let handle = *transport.by_addr.get(&peer).unwrap();
        let subscriber = transport.subscribers.get(&handle).unwrap().value().clone();

        transport
            .dispatch_client_message(&subscriber, CHANNEL_VIDEO, 1, Message::Nack { stream_id: StreamId::DEFAULT, msg_id: 1, missing: vec![] })
            .await
            .unwrap();

        // record_loss() only changes behavior on the sizer's next tick(),
        // but it must be reachable and non-panicking from the NACK path.
        subscriber.sizer.lock().tick();
    }

    #[tokio::test]
    async fn undecryptable_session_fragment_counts_as_a_dropped_frame() {
        let transport = transport().await;
        let peer: SocketAddr = "127.0.0.1:40011".parse().unwrap();
        transport
            .handle_hello(
                HelloRequest { device_id: "c".to_string(), role: "viewer".to_string(), platform: "t".to_string(), cipher_salt: None },
                peer,
            )
            .await
            .unwrap();
        let handle = *transport.by_addr.get(&peer).unwrap();
        let subscriber = transport.subscribers.get(&handle).unwrap().value().clone();
        assert_eq!(subscriber.stats().snapshot().frames_dropped, 0);

        let garbage = Fragment {
            header: FragmentHeader {
                version: PROTOCOL_VERSION,
                channel: CHANNEL_SERVICE,
                msg_id: 1,
                fragment_index: 0,
                fragment_count: 1,
                flags: FLAG_LAST_FRAGMENT,
            },
            payload: Bytes::from_static(b"not a valid ciphertext"),
        };
        let result = transport.handle_datagram(garbage.to_datagram(), peer).await;
        assert!(result.is_err());
        assert_eq!(subscriber.stats().snapshot().frames_dropped, 1);
    }

    #[test]
    fn retransmit_cache_returns_only_requested_indices() {
        let mut cache = RetransmitCache::new(Duration::from_secs(10), 8);
        let fragments = crate::protocol::fragment::split_message(CHANNEL_VIDEO, 1, &vec![1u8; 3000], 1000);
        cache.insert(CHANNEL_VIDEO, 1, fragments);

        let resent = cache.fragments_for(CHANNEL_VIDEO, 1, &[1]);
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].header.fragment_index, 1);
    }
}
