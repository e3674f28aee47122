/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

use crate::client::*;
use crate::client::synchronous::{new_sync_result_pair, SyncResultSender};
use crate::config::*;
use crate::decode::{decode_packet, Decoder};
use crate::encode::encode_packet;
use crate::encode::utils::MAXIMUM_VARIABLE_LENGTH_INTEGER;
use crate::error::{SchistError, SchistResult};
use crate::lock;
use crate::mqtt::*;
use crate::protocol::*;
use crate::queue::{FlushResult, OutboundQueue};
use crate::topic::{normalize_topic, validate_publish_topic, validate_subscription_filter};
use crate::transport::{Connection, TransportConfig};

use log::*;
use rand::Rng;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

const LOOP_POLL_INTERVAL : Duration = Duration::from_millis(5);

/// Result senders for operations still waiting on the broker
#[derive(Default)]
pub(crate) struct PendingOperations {
    connect: Option<SyncResultSender<ConnectResult>>,
    publishes: HashMap<u16, SyncResultSender<PublishResult>>,
    subscribes: HashMap<u16, SyncResultSender<SubscribeResult>>,
    unsubscribes: HashMap<u16, SyncResultSender<UnsubscribeResult>>,
}

impl PendingOperations {
    fn is_mid_in_use(&self, mid: u16) -> bool {
        self.publishes.contains_key(&mid) || self.subscribes.contains_key(&mid) || self.unsubscribes.contains_key(&mid)
    }
}

pub(crate) struct ReconnectBackoff {
    options: ReconnectOptions,
    next_reconnect_period: Duration,
    successful_connect_time: Option<Instant>,
}

impl ReconnectBackoff {
    pub(crate) fn new(mut options: ReconnectOptions) -> Self {
        options.normalize();

        ReconnectBackoff {
            next_reconnect_period: options.base_reconnect_period,
            options,
            successful_connect_time: None,
        }
    }

    fn clamp_reconnect_period(&self, mut reconnect_period: Duration) -> Duration {
        if reconnect_period > self.options.max_reconnect_period {
            reconnect_period = self.options.max_reconnect_period;
        }

        reconnect_period
    }

    fn compute_uniform_jitter_period(&self, max_nanos: u128) -> Duration {
        if max_nanos == 0 {
            return Duration::ZERO;
        }

        let mut rng = rand::thread_rng();
        let uniform_nanos = rng.gen_range(0..max_nanos);
        Duration::from_nanos(uniform_nanos as u64)
    }

    /// Returns how long to wait before the next connection attempt and advances the backoff.
    pub(crate) fn compute_reconnect_period(&mut self) -> Duration {
        let reconnect_period = self.next_reconnect_period;
        if self.options.exponential_backoff {
            self.next_reconnect_period = self.clamp_reconnect_period(self.next_reconnect_period.saturating_mul(2));
        } else {
            self.next_reconnect_period = self.options.base_reconnect_period;
        }

        match self.options.reconnect_period_jitter {
            ExponentialBackoffJitterType::None => {
                reconnect_period
            }
            ExponentialBackoffJitterType::Uniform => {
                self.compute_uniform_jitter_period(reconnect_period.as_nanos())
            }
        }
    }

    pub(crate) fn on_connection_success(&mut self, now: Instant) {
        self.successful_connect_time = Some(now);
    }

    /// A connection that stayed up longer than the stability period resets the backoff.
    pub(crate) fn on_connection_ended(&mut self, now: Instant) {
        if let Some(successful_connect_time) = self.successful_connect_time.take() {
            if now.saturating_duration_since(successful_connect_time) > self.options.reconnect_stability_reset_period {
                self.next_reconnect_period = self.options.base_reconnect_period;
            }
        }
    }
}

/// Serializes listener invocations.  An event emitted from inside a listener (on the delivering
/// thread) is appended to the deferred queue and delivered once the current callback returns.
pub(crate) struct EventDispatcher {
    listener: Option<ClientEventListener>,
    delivery: Mutex<()>,
    in_callback: AtomicBool,
    deferred: Mutex<VecDeque<Arc<ClientEvent>>>,
    delivering_thread: Mutex<Option<ThreadId>>,
}

struct DeliveryScope<'a> {
    dispatcher: &'a EventDispatcher,
}

impl Drop for DeliveryScope<'_> {
    fn drop(&mut self) {
        self.dispatcher.in_callback.store(false, Ordering::SeqCst);
        *lock(&self.dispatcher.delivering_thread) = None;
    }
}

impl EventDispatcher {
    pub(crate) fn new(listener: Option<ClientEventListener>) -> Self {
        EventDispatcher {
            listener,
            delivery: Mutex::new(()),
            in_callback: AtomicBool::new(false),
            deferred: Mutex::new(VecDeque::new()),
            delivering_thread: Mutex::new(None),
        }
    }

    pub(crate) fn in_callback(&self) -> bool {
        self.in_callback.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        let event = Arc::new(event);
        debug!("Broadcasting client event: {}", event);

        let Some(ClientEventListener::Callback(callback)) = &self.listener else {
            return;
        };

        if *lock(&self.delivering_thread) == Some(thread::current().id()) {
            trace!("EventDispatcher - deferring event emitted from inside a listener");
            lock(&self.deferred).push_back(event);
            return;
        }

        let _delivery = lock(&self.delivery);
        *lock(&self.delivering_thread) = Some(thread::current().id());
        self.in_callback.store(true, Ordering::SeqCst);
        let _scope = DeliveryScope { dispatcher: self };

        let mut next_event = Some(event);
        while let Some(event) = next_event {
            (callback)(event);
            next_event = lock(&self.deferred).pop_front();
        }
    }
}

/// The state behind every clone of an `MqttClient`.
///
/// Lock order: `pending` -> `store` -> `connection_state`; queue `current` -> `pending` ->
/// `transport`; `decoder` -> `transport`.  No lock is held while a listener runs.
pub(crate) struct ClientCore {
    transport_config: TransportConfig,
    connect_options: ConnectOptions,
    session: SessionState,
    transport: Mutex<Option<Connection>>,
    decoder: Mutex<Decoder>,
    queue: OutboundQueue,
    pending: Mutex<PendingOperations>,
    events: EventDispatcher,
    network_thread_active: AtomicBool,
    wants_connection: AtomicBool,
    reconnect: Mutex<ReconnectBackoff>,
    connect_lock: Mutex<()>,
}

fn publish_remaining_length(publish: &PublishPacket) -> usize {
    let packet_id_length = if publish.qos == QualityOfService::AtMostOnce { 0 } else { 2 };
    2 + publish.topic.len() + packet_id_length + publish.payload.len()
}

impl ClientCore {
    pub(crate) fn new(transport_config: TransportConfig, connect_options: ConnectOptions, listener: Option<ClientEventListener>) -> Self {
        let client_options = &transport_config.client_options;
        debug!("Creating new MQTT client - client options: {:?}", client_options);
        debug!("Creating new MQTT client - client id: \"{}\", keep alive: {}s, clean session: {}",
            connect_options.client_id(), connect_options.keep_alive_interval_seconds(), connect_options.clean_session());

        let session = SessionState::new(
            connect_options.client_id(),
            Duration::from_secs(connect_options.keep_alive_interval_seconds() as u64),
            client_options.connect_timeout,
            client_options.max_inflight_messages,
            client_options.message_retry_interval);

        let reconnect = ReconnectBackoff::new(client_options.reconnect_options);

        ClientCore {
            transport_config,
            connect_options,
            session,
            transport: Mutex::new(None),
            decoder: Mutex::new(Decoder::new()),
            queue: OutboundQueue::new(),
            pending: Mutex::new(PendingOperations::default()),
            events: EventDispatcher::new(listener),
            network_thread_active: AtomicBool::new(false),
            wants_connection: AtomicBool::new(false),
            reconnect: Mutex::new(reconnect),
            connect_lock: Mutex::new(()),
        }
    }

    pub(crate) fn client_id(&self) -> &str {
        self.connect_options.client_id()
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    pub(crate) fn has_transport(&self) -> bool {
        lock(&self.transport).is_some()
    }

    pub(crate) fn wants_connection(&self) -> bool {
        self.wants_connection.load(Ordering::SeqCst)
    }

    pub(crate) fn set_network_thread_active(&self, active: bool) {
        self.network_thread_active.store(active, Ordering::SeqCst);
    }

    pub(crate) fn next_reconnect_period(&self) -> Duration {
        lock(&self.reconnect).compute_reconnect_period()
    }

    pub(crate) fn connect(&self) -> SchistResult<SyncConnectResult> {
        self.wants_connection.store(true, Ordering::SeqCst);

        let (receiver, sender) = new_sync_result_pair();
        self.establish_connection(Some(sender), false)?;

        Ok(receiver)
    }

    /// Reconnect path of the network thread.  Does nothing if a transport appeared in the meantime.
    pub(crate) fn reconnect_if_idle(&self) -> SchistResult<()> {
        self.establish_connection(None, true)
    }

    fn establish_connection(&self, sender: Option<SyncResultSender<ConnectResult>>, only_if_idle: bool) -> SchistResult<()> {
        let _connecting = lock(&self.connect_lock);

        if only_if_idle && self.has_transport() {
            debug!("client {} already has a transport; skipping reconnect", self.client_id());
            return Ok(());
        }

        if self.release_connection("connection replaced by a new connect") {
            info!("client {} closed its previous connection before reconnecting", self.client_id());
        }

        lock(&self.decoder).reset_for_new_connection();

        info!("client {} connecting to {}:{}", self.client_id(), self.transport_config.host, self.transport_config.port);
        let connect = encode_packet(&MqttPacket::Connect(self.connect_options.to_connect_packet()))?;
        let connection = match crate::transport::connect(&self.transport_config) {
            Ok(connection) => { connection }
            Err(error) => {
                error!("client {} failed to open a transport: {}", self.client_id(), error);
                self.queue.clear();
                self.session.set_connection_state(ConnectionState::New);
                return Err(error);
            }
        };

        /* Connect must be first on the wire; anything queued for the old connection goes with it */
        self.queue.reset_with(connect);

        if let Some(sender) = sender {
            lock(&self.pending).connect = Some(sender);
        }

        self.session.begin_connect(Instant::now());
        *lock(&self.transport) = Some(connection);

        drop(_connecting);
        self.try_flush();

        Ok(())
    }

    fn enqueue_packet(&self, packet: &MqttPacket) -> SchistResult<()> {
        let encoded = encode_packet(packet)?;
        self.queue.enqueue(encoded);

        Ok(())
    }

    /// Writes synchronously unless a listener is running or a network thread owns the socket.
    fn try_flush(&self) {
        if self.events.in_callback() || self.network_thread_active.load(Ordering::SeqCst) {
            return;
        }

        if let Err(error) = self.loop_write() {
            debug!("client {} synchronous flush failed: {}", self.client_id(), error);
        }
    }

    pub(crate) fn publish(&self, mut publish: PublishPacket) -> SchistResult<SyncPublishResult> {
        publish.topic = normalize_topic(&publish.topic);
        validate_publish_topic(&publish.topic)?;

        let remaining_length = publish_remaining_length(&publish);
        if remaining_length > MAXIMUM_VARIABLE_LENGTH_INTEGER {
            error!("client {} publish of {} bytes exceeds the maximum packet size", self.client_id(), remaining_length);
            return Err(SchistError::new_payload_too_large(remaining_length));
        }

        let (receiver, sender) = new_sync_result_pair();
        let mid = {
            let mut pending = lock(&self.pending);
            let mut store = lock(&self.session.store);
            let state = self.session.connection_state();

            if publish.qos == QualityOfService::AtMostOnce && state != ConnectionState::Connected {
                warn!("client {} QoS 0 publish rejected; not connected", self.client_id());
                return Err(SchistError::new_no_connection());
            }

            let mid = store.generate_mid(|id| pending.is_mid_in_use(id))?;
            publish.packet_id = mid;

            let packet = store.add_outbound(publish, state == ConnectionState::Connected, Instant::now());
            pending.publishes.insert(mid, sender);

            /* queue lock nests inside the store lock so wire order follows mid assignment */
            match &packet {
                Some(packet) => { self.enqueue_packet(packet)?; }
                None => { debug!("client {} stored publish {} for later transmission", self.client_id(), mid); }
            }

            mid
        };

        self.try_flush();

        Ok(SyncPublishResult::new(mid, receiver))
    }

    pub(crate) fn subscribe(&self, mut subscribe: SubscribePacket) -> SchistResult<SyncSubscribeResult> {
        if subscribe.subscriptions.is_empty() {
            return Err(SchistError::new_invalid_argument("subscribe packet contains no subscriptions"));
        }

        for subscription in subscribe.subscriptions.iter_mut() {
            subscription.topic_filter = normalize_topic(&subscription.topic_filter);
            validate_subscription_filter(&subscription.topic_filter)?;
        }

        if !self.has_transport() {
            return Err(SchistError::new_no_connection());
        }

        let (receiver, sender) = new_sync_result_pair();
        {
            let mut pending = lock(&self.pending);
            let mid = lock(&self.session.store).generate_mid(|id| pending.is_mid_in_use(id))?;
            subscribe.packet_id = mid;
            pending.subscribes.insert(mid, sender);
        }

        self.enqueue_packet(&MqttPacket::Subscribe(subscribe))?;
        self.try_flush();

        Ok(receiver)
    }

    pub(crate) fn unsubscribe(&self, mut unsubscribe: UnsubscribePacket) -> SchistResult<SyncUnsubscribeResult> {
        if unsubscribe.topic_filters.is_empty() {
            return Err(SchistError::new_invalid_argument("unsubscribe packet contains no topic filters"));
        }

        for topic_filter in unsubscribe.topic_filters.iter_mut() {
            *topic_filter = normalize_topic(topic_filter);
            validate_subscription_filter(topic_filter)?;
        }

        if !self.has_transport() {
            return Err(SchistError::new_no_connection());
        }

        let (receiver, sender) = new_sync_result_pair();
        {
            let mut pending = lock(&self.pending);
            let mid = lock(&self.session.store).generate_mid(|id| pending.is_mid_in_use(id))?;
            unsubscribe.packet_id = mid;
            pending.unsubscribes.insert(mid, sender);
        }

        self.enqueue_packet(&MqttPacket::Unsubscribe(unsubscribe))?;
        self.try_flush();

        Ok(receiver)
    }

    pub(crate) fn disconnect(&self) -> SchistResult<()> {
        self.wants_connection.store(false, Ordering::SeqCst);

        if !self.has_transport() {
            return Err(SchistError::new_no_connection());
        }

        info!("client {} disconnecting", self.client_id());
        self.session.set_connection_state(ConnectionState::Disconnecting);
        self.enqueue_packet(&MqttPacket::Disconnect(DisconnectPacket {}))?;
        self.try_flush();

        Ok(())
    }

    /// Closes the connection on behalf of a forced loop stop; no reconnect follows.
    pub(crate) fn abandon_connection(&self) {
        self.wants_connection.store(false, Ordering::SeqCst);
        self.teardown(DisconnectReason::Unexpected(SchistError::new_client_closed()));
    }

    fn poll_transport(&self) -> SchistResult<bool> {
        match lock(&self.transport).as_mut() {
            Some(connection) => { connection.poll_connected() }
            None => { Err(SchistError::new_no_connection()) }
        }
    }

    fn service_read(&self) -> SchistResult<usize> {
        if !self.poll_transport()? {
            return Ok(0);
        }

        let mut packets_read = 0;
        loop {
            let inbound = {
                let mut decoder = lock(&self.decoder);
                let mut transport = lock(&self.transport);
                let Some(connection) = transport.as_mut() else {
                    return Ok(packets_read);
                };

                decoder.read_packet(connection)?
            };

            let Some(inbound) = inbound else {
                return Ok(packets_read);
            };

            packets_read += 1;
            let packet = decode_packet(inbound)?;
            let outcome = dispatch_packet(&self.session, packet, Instant::now())?;

            for response in &outcome.responses {
                self.enqueue_packet(response)?;
            }

            self.process_events(outcome.events)?;
        }
    }

    fn process_events(&self, events: Vec<ProtocolEvent>) -> SchistResult<()> {
        for event in events {
            match event {
                ProtocolEvent::ConnectionAccepted(connack) => {
                    lock(&self.reconnect).on_connection_success(Instant::now());

                    let sender = lock(&self.pending).connect.take();
                    if let Some(sender) = sender {
                        sender.apply(Ok(connack.return_code));
                    }

                    self.events.emit(ClientEvent::ConnectionResult(ConnectionResultEvent {
                        return_code: connack.return_code,
                        session_present: connack.session_present,
                    }));
                }
                ProtocolEvent::ConnectionRefused(connack) => {
                    let sender = lock(&self.pending).connect.take();
                    if let Some(sender) = sender {
                        sender.apply(Err(SchistError::new_connection_refused(connack.return_code)));
                    }

                    self.events.emit(ClientEvent::ConnectionResult(ConnectionResultEvent {
                        return_code: connack.return_code,
                        session_present: connack.session_present,
                    }));

                    return Err(SchistError::new_connection_refused(connack.return_code));
                }
                ProtocolEvent::PublishReceived(publish) => {
                    self.events.emit(ClientEvent::PublishReceived(PublishReceivedEvent { publish }));
                }
                ProtocolEvent::PublishCompleted(mid) => {
                    self.complete_publish(mid);
                }
                ProtocolEvent::SubscribeCompleted(suback) => {
                    let sender = lock(&self.pending).subscribes.remove(&suback.packet_id);
                    match sender {
                        Some(sender) => { sender.apply(Ok(suback.clone())); }
                        None => { warn!("client {} received SUBACK for unknown subscribe {}", self.client_id(), suback.packet_id); }
                    }

                    self.events.emit(ClientEvent::SubscribeCompleted(SubscribeCompletedEvent { suback }));
                }
                ProtocolEvent::UnsubscribeCompleted(unsuback) => {
                    let sender = lock(&self.pending).unsubscribes.remove(&unsuback.packet_id);
                    match sender {
                        Some(sender) => { sender.apply(Ok(unsuback.clone())); }
                        None => { warn!("client {} received UNSUBACK for unknown unsubscribe {}", self.client_id(), unsuback.packet_id); }
                    }

                    self.events.emit(ClientEvent::UnsubscribeCompleted(UnsubscribeCompletedEvent { unsuback }));
                }
            }
        }

        Ok(())
    }

    fn complete_publish(&self, mid: u16) {
        let sender = lock(&self.pending).publishes.remove(&mid);
        if let Some(sender) = sender {
            sender.apply(Ok(mid));
        }

        self.events.emit(ClientEvent::PublishCompleted(PublishCompletedEvent { mid }));
    }

    fn service_write(&self) -> SchistResult<FlushResult> {
        if !self.poll_transport()? {
            return Ok(FlushResult::default());
        }

        let result = self.queue.flush(&self.transport)?;
        if result.bytes_written > 0 {
            self.session.note_outbound_activity(Instant::now());
        }

        for mid in &result.qos0_completed {
            let completed = lock(&self.session.store).complete_qos0(*mid);
            if completed {
                self.complete_publish(*mid);
            }
        }

        if result.disconnect_written {
            info!("client {} disconnect written; closing connection", self.client_id());
            self.teardown(DisconnectReason::Requested);
        }

        Ok(result)
    }

    fn service_misc(&self) -> SchistResult<usize> {
        if !self.has_transport() {
            return Err(SchistError::new_no_connection());
        }

        let packets = check_keepalive(&self.session, Instant::now())?;
        for packet in &packets {
            self.enqueue_packet(packet)?;
        }

        Ok(packets.len())
    }

    /// Funnels a service failure: transient conditions are swallowed, anything fatal tears the
    /// connection down before the error is returned.
    fn run_service<T, F>(&self, service: F) -> SchistResult<T> where T : Default, F : FnOnce() -> SchistResult<T> {
        match service() {
            Ok(value) => { Ok(value) }
            Err(SchistError::WouldBlock(_)) => { Ok(T::default()) }
            Err(error @ SchistError::NoConnection(_)) => { Err(error) }
            Err(error) => {
                error!("client {} connection failed: {}", self.client_id(), error);
                self.teardown(DisconnectReason::Unexpected(error.replicate()));
                Err(error)
            }
        }
    }

    pub(crate) fn loop_read(&self) -> SchistResult<usize> {
        self.run_service(|| self.service_read())
    }

    pub(crate) fn loop_write(&self) -> SchistResult<FlushResult> {
        self.run_service(|| self.service_write())
    }

    pub(crate) fn loop_misc(&self) -> SchistResult<usize> {
        self.run_service(|| self.service_misc())
    }

    /// One read/timers/write pass.  Returns true if any bytes moved.
    pub(crate) fn service_once(&self) -> SchistResult<bool> {
        let packets_read = self.loop_read()?;
        self.loop_misc()?;
        let flushed = self.loop_write()?;

        trace!("client {} service pass read {} packets, wrote {} bytes", self.client_id(), packets_read, flushed.bytes_written);

        Ok(packets_read > 0 || flushed.bytes_written > 0)
    }

    pub(crate) fn loop_once(&self, timeout: Duration) -> SchistResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.service_once()? {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }

            thread::sleep(LOOP_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Closes the transport and fails everything bound to it.  Returns false if there was no
    /// transport.
    fn release_connection(&self, reason: &str) -> bool {
        let connection = lock(&self.transport).take();
        let Some(mut connection) = connection else {
            return false;
        };

        connection.close();
        self.queue.clear();
        lock(&self.decoder).reset_for_new_connection();

        let dropped_qos0 = lock(&self.session.store).drop_qos0();
        {
            let mut pending = lock(&self.pending);
            for mid in dropped_qos0 {
                if let Some(sender) = pending.publishes.remove(&mid) {
                    sender.apply(Err(SchistError::new_connection_lost(reason.to_string())));
                }
            }

            for (_, sender) in pending.subscribes.drain() {
                sender.apply(Err(SchistError::new_connection_lost(reason.to_string())));
            }

            for (_, sender) in pending.unsubscribes.drain() {
                sender.apply(Err(SchistError::new_connection_lost(reason.to_string())));
            }

            if let Some(sender) = pending.connect.take() {
                sender.apply(Err(SchistError::new_connection_lost(reason.to_string())));
            }
        }

        self.session.set_connection_state(ConnectionState::New);

        true
    }

    fn teardown(&self, reason: DisconnectReason) {
        if !self.release_connection("connection closed before the operation completed") {
            return;
        }

        lock(&self.reconnect).on_connection_ended(Instant::now());
        info!("client {} connection closed", self.client_id());

        self.events.emit(ClientEvent::Disconnection(DisconnectionEvent { reason }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;

    fn make_backoff(exponential_backoff: bool) -> ReconnectBackoff {
        ReconnectBackoff::new(ReconnectOptions {
            exponential_backoff,
            reconnect_period_jitter: ExponentialBackoffJitterType::None,
            base_reconnect_period: Duration::from_secs(1),
            max_reconnect_period: Duration::from_secs(10),
            reconnect_stability_reset_period: Duration::from_secs(30),
        })
    }

    #[test]
    fn backoff_doubles_up_to_maximum() {
        let mut backoff = make_backoff(true);
        let periods : Vec<u64> = (0..6).map(|_| backoff.compute_reconnect_period().as_secs()).collect();
        assert_eq!(vec!(1, 2, 4, 8, 10, 10), periods);
    }

    #[test]
    fn backoff_fixed_when_exponential_disabled() {
        let mut backoff = make_backoff(false);
        for _ in 0..4 {
            assert_eq!(Duration::from_secs(1), backoff.compute_reconnect_period());
        }
    }

    #[test]
    fn backoff_resets_after_stable_connection() {
        let mut backoff = make_backoff(true);
        for _ in 0..4 {
            backoff.compute_reconnect_period();
        }

        let connected = Instant::now();
        backoff.on_connection_success(connected);
        backoff.on_connection_ended(connected + Duration::from_secs(5));
        assert_eq!(Duration::from_secs(10), backoff.compute_reconnect_period());

        backoff.on_connection_success(connected);
        backoff.on_connection_ended(connected + Duration::from_secs(31));
        assert_eq!(Duration::from_secs(1), backoff.compute_reconnect_period());
    }

    #[test]
    fn backoff_uniform_jitter_stays_in_range() {
        let mut backoff = ReconnectBackoff::new(ReconnectOptions {
            reconnect_period_jitter: ExponentialBackoffJitterType::Uniform,
            ..Default::default()
        });

        for _ in 0..10 {
            assert!(backoff.compute_reconnect_period() <= Duration::from_secs(120));
        }
    }

    #[test]
    fn backoff_options_are_normalized() {
        let mut backoff = ReconnectBackoff::new(ReconnectOptions {
            base_reconnect_period: Duration::from_secs(8),
            max_reconnect_period: Duration::from_secs(2),
            ..Default::default()
        });

        assert_eq!(Duration::from_secs(2), backoff.compute_reconnect_period());
        assert_eq!(Duration::from_secs(4), backoff.compute_reconnect_period());
        assert_eq!(Duration::from_secs(8), backoff.compute_reconnect_period());
        assert_eq!(Duration::from_secs(8), backoff.compute_reconnect_period());
    }

    #[test]
    fn events_emitted_from_a_listener_are_deferred() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let dispatcher : Arc<Mutex<Option<Arc<EventDispatcher>>>> = Arc::new(Mutex::new(None));

        let callback_order = order.clone();
        let callback_dispatcher = dispatcher.clone();
        let listener = ClientEventListener::Callback(Arc::new(move |event: Arc<ClientEvent>| {
            if let ClientEvent::PublishCompleted(completed) = event.as_ref() {
                callback_order.lock().unwrap().push(format!("start {}", completed.mid));
                if completed.mid == 1 {
                    let inner = callback_dispatcher.lock().unwrap().clone().unwrap();
                    assert!(inner.in_callback());
                    inner.emit(ClientEvent::PublishCompleted(PublishCompletedEvent { mid: 2 }));
                }
                callback_order.lock().unwrap().push(format!("end {}", completed.mid));
            }
        }));

        let events = Arc::new(EventDispatcher::new(Some(listener)));
        *dispatcher.lock().unwrap() = Some(events.clone());

        events.emit(ClientEvent::PublishCompleted(PublishCompletedEvent { mid: 1 }));

        assert_eq!(vec!("start 1", "end 1", "start 2", "end 2"), *order.lock().unwrap());
        assert!(!events.in_callback());
    }

    #[test]
    fn events_without_listener_are_dropped() {
        let events = EventDispatcher::new(None);
        events.emit(ClientEvent::PublishCompleted(PublishCompletedEvent { mid: 1 }));
        assert!(!events.in_callback());
    }

    fn make_core(listener: Option<ClientEventListener>) -> ClientCore {
        let transport_config = TransportConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            tls_options: None,
            client_options: MqttClientOptions::default(),
        };

        let connect_options = ConnectOptionsBuilder::new().with_client_id("core-test").build().unwrap();

        ClientCore::new(transport_config, connect_options, listener)
    }

    #[test]
    fn offline_operations() {
        let core = make_core(None);
        assert_eq!(ConnectionState::New, core.connection_state());

        assert_matches!(core.publish(PublishPacket::new("a/b", QualityOfService::AtMostOnce, b"x")), Err(SchistError::NoConnection(_)));
        assert_matches!(core.subscribe(SubscribePacket::new("a/+", QualityOfService::AtLeastOnce)), Err(SchistError::NoConnection(_)));
        assert_matches!(core.unsubscribe(UnsubscribePacket::new("a/+")), Err(SchistError::NoConnection(_)));
        assert_matches!(core.disconnect(), Err(SchistError::NoConnection(_)));
        assert_matches!(core.loop_once(Duration::from_millis(1)), Err(SchistError::NoConnection(_)));
    }

    #[test]
    fn offline_qos1_publish_is_stored() {
        let core = make_core(None);

        let first = core.publish(PublishPacket::new("a/b", QualityOfService::AtLeastOnce, b"x")).unwrap();
        let second = core.publish(PublishPacket::new("a/b", QualityOfService::ExactlyOnce, b"y")).unwrap();
        assert_ne!(0, first.mid());
        assert_ne!(first.mid(), second.mid());
        assert!(first.try_recv().is_none());

        assert!(lock(&core.session.store).contains_outbound(first.mid()));
        assert!(core.queue.is_empty());
    }

    #[test]
    fn concurrent_publishes_queue_in_mid_order() {
        let core = Arc::new(make_core(None));
        core.session.set_connection_state(ConnectionState::Connected);

        let publishers : Vec<_> = (0..4).map(|index| {
            let core = core.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    core.publish(PublishPacket::new(&format!("load/{}", index), QualityOfService::AtMostOnce, b"x")).unwrap();
                }
            })
        }).collect();

        for publisher in publishers {
            publisher.join().unwrap();
        }

        let mids : Vec<u16> = core.queue.pending_packet_ids().into_iter().map(|mid| mid.unwrap()).collect();
        assert_eq!((1..=100).collect::<Vec<u16>>(), mids);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let core = make_core(None);

        assert_matches!(core.publish(PublishPacket::new("a/#", QualityOfService::AtLeastOnce, b"x")), Err(SchistError::InvalidArgument(_)));
        assert_matches!(core.publish(PublishPacket::new("///", QualityOfService::AtLeastOnce, b"x")), Err(SchistError::InvalidArgument(_)));
        assert_matches!(core.subscribe(SubscribePacket::new("a/b#", QualityOfService::AtMostOnce)), Err(SchistError::InvalidArgument(_)));
        assert_matches!(core.subscribe(SubscribePacket::builder().build()), Err(SchistError::InvalidArgument(_)));
        assert_matches!(core.unsubscribe(UnsubscribePacket::builder().build()), Err(SchistError::InvalidArgument(_)));
    }

    #[test]
    fn failed_connect_leaves_client_idle() {
        let disconnections = Arc::new(AtomicUsize::new(0));
        let counter = disconnections.clone();
        let listener = ClientEventListener::Callback(Arc::new(move |event: Arc<ClientEvent>| {
            if let ClientEvent::Disconnection(_) = event.as_ref() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let listener_socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener_socket.local_addr().unwrap().port();
        drop(listener_socket);

        let mut core = make_core(Some(listener));
        core.transport_config.port = port;

        assert_matches!(core.connect(), Err(SchistError::ConnectionEstablishmentFailure(_)));
        assert_eq!(ConnectionState::New, core.connection_state());
        assert!(!core.has_transport());
        assert!(core.wants_connection());
        assert_eq!(0, disconnections.load(Ordering::SeqCst));
    }
}
