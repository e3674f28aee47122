/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Session state shared by every thread touching a client, the inbound packet dispatcher and the
keep alive check.

Nothing in here performs I/O.  Handlers return the packets that must be written and the events the
client must deliver; the caller enqueues and delivers them with no session lock held.
 */

use crate::error::{SchistError, SchistResult};
use crate::lock;
use crate::mqtt::*;
use crate::store::{MessageStore, StoreUpdate};
use crate::topic::normalize_topic;

use log::*;

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Lifecycle of the MQTT session riding on the current transport
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {

    /// No transport, or a transport that has not been handed a Connect yet
    #[default]
    New,

    /// Connect written or pending; waiting for the broker's Connack
    Connecting,

    /// Connack accepted
    Connected,

    /// Disconnect requested; the transport is closed once it has been written
    Disconnecting,
}

pub(crate) struct ActivityState {
    pub(crate) keep_alive: Duration,
    pub(crate) last_inbound: Instant,
    pub(crate) last_outbound: Instant,
    pub(crate) ping_outstanding: bool,
    pub(crate) connect_started: Option<Instant>,
    pub(crate) connect_timeout: Duration,
}

impl ActivityState {
    fn reset(&mut self, now: Instant) {
        self.last_inbound = now;
        self.last_outbound = now;
        self.ping_outstanding = false;
        self.connect_started = Some(now);
    }

    fn keep_alive_elapsed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_outbound) >= self.keep_alive ||
            now.saturating_duration_since(self.last_inbound) >= self.keep_alive
    }
}

/// Per-client protocol state.  Each concern sits behind its own lock so that a publish on one
/// thread never waits for an unrelated activity update on another.
pub(crate) struct SessionState {
    pub(crate) client_id: String,
    pub(crate) connection_state: Mutex<ConnectionState>,
    pub(crate) store: Mutex<MessageStore>,
    pub(crate) activity: Mutex<ActivityState>,
}

impl SessionState {
    pub(crate) fn new(client_id: &str, keep_alive: Duration, connect_timeout: Duration, max_inflight: usize, retry_interval: Duration) -> Self {
        let now = Instant::now();

        SessionState {
            client_id: client_id.to_string(),
            connection_state: Mutex::new(ConnectionState::New),
            store: Mutex::new(MessageStore::new(max_inflight, retry_interval)),
            activity: Mutex::new(ActivityState {
                keep_alive,
                last_inbound: now,
                last_outbound: now,
                ping_outstanding: false,
                connect_started: None,
                connect_timeout,
            }),
        }
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        *lock(&self.connection_state)
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        let mut current = lock(&self.connection_state);
        if *current != state {
            debug!("client {} connection state {:?} -> {:?}", self.client_id, *current, state);
            *current = state;
        }
    }

    /// Moves to `Connecting` and restarts every activity clock for a fresh transport.
    pub(crate) fn begin_connect(&self, now: Instant) {
        self.set_connection_state(ConnectionState::Connecting);
        lock(&self.activity).reset(now);
    }

    pub(crate) fn note_outbound_activity(&self, now: Instant) {
        lock(&self.activity).last_outbound = now;
    }
}

/// Something the client must report to the application
#[derive(Debug)]
pub(crate) enum ProtocolEvent {
    ConnectionAccepted(ConnackPacket),
    ConnectionRefused(ConnackPacket),
    PublishReceived(PublishPacket),
    PublishCompleted(u16),
    SubscribeCompleted(SubackPacket),
    UnsubscribeCompleted(UnsubackPacket),
}

/// Everything a single inbound packet produced
#[derive(Debug, Default)]
pub(crate) struct DispatchOutcome {
    pub(crate) responses: Vec<MqttPacket>,
    pub(crate) events: Vec<ProtocolEvent>,
}

fn require_session(session: &SessionState, packet_name: &str) -> SchistResult<()> {
    match session.connection_state() {
        ConnectionState::Connected | ConnectionState::Disconnecting => { Ok(()) }
        state => {
            error!("client {} received {} in state {:?}", session.client_id, packet_name, state);
            Err(SchistError::new_protocol_error(format!("{} received before the session was established", packet_name)))
        }
    }
}

fn handle_connack(session: &SessionState, connack: ConnackPacket, now: Instant) -> SchistResult<DispatchOutcome> {
    debug!("client {} received CONNACK ({:?})", session.client_id, connack.return_code);

    if session.connection_state() != ConnectionState::Connecting {
        error!("client {} received CONNACK outside of a connection attempt", session.client_id);
        return Err(SchistError::new_protocol_error("unexpected connack"));
    }

    let mut outcome = DispatchOutcome::default();

    if connack.return_code != ConnectReturnCode::Accepted {
        warn!("client {} connection refused by broker: {:?}", session.client_id, connack.return_code);
        outcome.events.push(ProtocolEvent::ConnectionRefused(connack));
        return Ok(outcome);
    }

    {
        let mut activity = lock(&session.activity);
        activity.connect_started = None;
        activity.ping_outstanding = false;
    }

    /* publishers check the state under the store lock, so nothing can slip in between */
    {
        let mut store = lock(&session.store);
        session.set_connection_state(ConnectionState::Connected);
        outcome.responses = store.reconnect_reset(now);
    }
    info!("client {} connected (session present: {})", session.client_id, connack.session_present);
    outcome.events.push(ProtocolEvent::ConnectionAccepted(connack));

    Ok(outcome)
}

fn handle_publish(session: &SessionState, mut publish: PublishPacket, now: Instant) -> SchistResult<DispatchOutcome> {
    debug!("client {} received PUBLISH (d{}, q{}, r{}, mid: {}, '{}', ... ({} bytes))",
        session.client_id, publish.duplicate as u8, publish.qos as u8, publish.retain as u8, publish.packet_id, publish.topic, publish.payload.len());

    require_session(session, "PUBLISH")?;

    publish.topic = normalize_topic(&publish.topic);
    if publish.topic.is_empty() {
        error!("client {} received PUBLISH with an empty topic", session.client_id);
        return Err(SchistError::new_protocol_error("inbound publish has an empty topic"));
    }

    let mut outcome = DispatchOutcome::default();
    let mid = publish.packet_id;

    match publish.qos {
        QualityOfService::AtMostOnce => {
            outcome.events.push(ProtocolEvent::PublishReceived(publish));
        }
        QualityOfService::AtLeastOnce => {
            outcome.events.push(ProtocolEvent::PublishReceived(publish));
            outcome.responses.push(MqttPacket::Puback(PubackPacket::new(mid)));
        }
        QualityOfService::ExactlyOnce => {
            if !lock(&session.store).add_inbound_qos2(publish, now) {
                debug!("client {} already holds QoS 2 message {}; not delivering again", session.client_id, mid);
            }

            outcome.responses.push(MqttPacket::Pubrec(PubrecPacket::new(mid)));
        }
    }

    Ok(outcome)
}

fn apply_store_update<F>(session: &SessionState, packet_name: &str, mid: u16, update: F) -> SchistResult<DispatchOutcome>
    where F : FnOnce(&mut MessageStore) -> SchistResult<StoreUpdate> {
    debug!("client {} received {} (mid: {})", session.client_id, packet_name, mid);

    require_session(session, packet_name)?;

    let mut outcome = DispatchOutcome::default();
    let result = {
        let mut store = lock(&session.store);
        update(&mut *store)
    };

    match result {
        Ok(store_update) => {
            if let Some(completed) = store_update.completed {
                outcome.events.push(ProtocolEvent::PublishCompleted(completed));
            }

            if let Some(delivered) = store_update.delivered {
                outcome.events.push(ProtocolEvent::PublishReceived(delivered));
            }

            outcome.responses = store_update.packets;
        }
        Err(SchistError::NotFound(_)) => {
            warn!("client {} received {} for unknown message {}", session.client_id, packet_name, mid);
        }
        Err(error) => {
            return Err(error);
        }
    }

    Ok(outcome)
}

fn handle_pubrel(session: &SessionState, mid: u16) -> SchistResult<DispatchOutcome> {
    let mut outcome = apply_store_update(session, "PUBREL", mid, |store| Ok(store.handle_pubrel(mid)))?;

    /* a Pubrel for an unknown message is still completed so that the broker can release it */
    outcome.responses.push(MqttPacket::Pubcomp(PubcompPacket::new(mid)));

    Ok(outcome)
}

/// Applies one decoded packet to the session.
///
/// The last-inbound activity timestamp is refreshed before the packet is examined.  Any error
/// returned is fatal to the connection.
pub(crate) fn dispatch_packet(session: &SessionState, packet: MqttPacket, now: Instant) -> SchistResult<DispatchOutcome> {
    lock(&session.activity).last_inbound = now;

    match packet {
        MqttPacket::Connack(connack) => { handle_connack(session, connack, now) }
        MqttPacket::Publish(publish) => { handle_publish(session, publish, now) }
        MqttPacket::Puback(puback) => {
            let mid = puback.packet_id;
            apply_store_update(session, "PUBACK", mid, |store| store.handle_puback(mid, now))
        }
        MqttPacket::Pubrec(pubrec) => {
            let mid = pubrec.packet_id;
            apply_store_update(session, "PUBREC", mid, |store| store.handle_pubrec(mid, now))
        }
        MqttPacket::Pubrel(pubrel) => { handle_pubrel(session, pubrel.packet_id) }
        MqttPacket::Pubcomp(pubcomp) => {
            let mid = pubcomp.packet_id;
            apply_store_update(session, "PUBCOMP", mid, |store| store.handle_pubcomp(mid, now))
        }
        MqttPacket::Suback(suback) => {
            debug!("client {} received SUBACK (mid: {})", session.client_id, suback.packet_id);
            require_session(session, "SUBACK")?;

            Ok(DispatchOutcome {
                events: vec!(ProtocolEvent::SubscribeCompleted(suback)),
                ..Default::default()
            })
        }
        MqttPacket::Unsuback(unsuback) => {
            debug!("client {} received UNSUBACK (mid: {})", session.client_id, unsuback.packet_id);
            require_session(session, "UNSUBACK")?;

            Ok(DispatchOutcome {
                events: vec!(ProtocolEvent::UnsubscribeCompleted(unsuback)),
                ..Default::default()
            })
        }
        MqttPacket::Pingreq(_) => {
            debug!("client {} received PINGREQ", session.client_id);

            Ok(DispatchOutcome {
                responses: vec!(MqttPacket::Pingresp(PingrespPacket {})),
                ..Default::default()
            })
        }
        MqttPacket::Pingresp(_) => {
            debug!("client {} received PINGRESP", session.client_id);
            lock(&session.activity).ping_outstanding = false;

            Ok(DispatchOutcome::default())
        }
        packet => {
            error!("client {} received a {} which only a broker may receive", session.client_id, packet.packet_type());
            Err(SchistError::new_protocol_error(format!("{} is not valid broker-to-client traffic", packet.packet_type())))
        }
    }
}

/// Periodic timer work: Connack timeout, keep alive pings and QoS retries.
///
/// Returns the packets to enqueue, or the error that must tear the connection down.
pub(crate) fn check_keepalive(session: &SessionState, now: Instant) -> SchistResult<Vec<MqttPacket>> {
    match session.connection_state() {
        ConnectionState::Connecting => {
            let activity = lock(&session.activity);
            if let Some(started) = activity.connect_started {
                if now.saturating_duration_since(started) >= activity.connect_timeout {
                    error!("client {} timed out waiting for CONNACK", session.client_id);
                    return Err(SchistError::new_connection_establishment_failure("connack response timeout reached"));
                }
            }

            Ok(Vec::new())
        }
        ConnectionState::Connected => {
            let mut packets = Vec::new();

            {
                let mut activity = lock(&session.activity);
                if !activity.keep_alive.is_zero() && activity.keep_alive_elapsed(now) {
                    if activity.ping_outstanding {
                        error!("client {} has not heard a PINGRESP within the keep alive interval", session.client_id);
                        return Err(SchistError::new_keepalive_timeout());
                    }

                    debug!("client {} sending PINGREQ", session.client_id);
                    activity.ping_outstanding = true;
                    activity.last_inbound = now;
                    activity.last_outbound = now;
                    packets.push(MqttPacket::Pingreq(PingreqPacket {}));
                }
            }

            packets.extend(lock(&session.store).retry_check(now));

            Ok(packets)
        }
        _ => { Ok(Vec::new()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const KEEP_ALIVE : Duration = Duration::from_secs(10);

    fn make_session() -> SessionState {
        SessionState::new("test-client", KEEP_ALIVE, Duration::from_secs(5), 20, Duration::from_secs(20))
    }

    fn make_connected_session(now: Instant) -> SessionState {
        let session = make_session();
        session.begin_connect(now);
        dispatch_packet(&session, MqttPacket::Connack(ConnackPacket::default()), now).unwrap();
        assert_eq!(ConnectionState::Connected, session.connection_state());
        session
    }

    fn publish(mid: u16, qos: QualityOfService) -> PublishPacket {
        PublishPacket {
            packet_id: mid,
            ..PublishPacket::new("a/b", qos, b"hello")
        }
    }

    #[test]
    fn connack_accepted_connects_and_resends_session() {
        let now = Instant::now();
        let session = make_session();
        lock(&session.store).add_outbound(publish(4, QualityOfService::AtLeastOnce), false, now);

        session.begin_connect(now);
        let outcome = dispatch_packet(&session, MqttPacket::Connack(ConnackPacket { session_present: true, return_code: ConnectReturnCode::Accepted }), now).unwrap();

        assert_eq!(ConnectionState::Connected, session.connection_state());
        assert_eq!(1, outcome.responses.len());
        assert_matches!(&outcome.responses[0], MqttPacket::Publish(packet) => {
            assert_eq!(4, packet.packet_id);
        });
        assert_matches!(&outcome.events[0], ProtocolEvent::ConnectionAccepted(connack) => {
            assert!(connack.session_present);
        });
    }

    #[test]
    fn connack_refused_leaves_state_alone() {
        let now = Instant::now();
        let session = make_session();
        session.begin_connect(now);

        let connack = ConnackPacket { session_present: false, return_code: ConnectReturnCode::NotAuthorized };
        let outcome = dispatch_packet(&session, MqttPacket::Connack(connack), now).unwrap();

        assert_eq!(ConnectionState::Connecting, session.connection_state());
        assert!(outcome.responses.is_empty());
        assert_matches!(&outcome.events[0], ProtocolEvent::ConnectionRefused(connack) => {
            assert_eq!(ConnectReturnCode::NotAuthorized, connack.return_code);
        });
    }

    #[test]
    fn connack_when_not_connecting_is_protocol_error() {
        let now = Instant::now();
        let session = make_connected_session(now);
        assert_matches!(dispatch_packet(&session, MqttPacket::Connack(ConnackPacket::default()), now), Err(SchistError::ProtocolError(_)));
    }

    #[test]
    fn publish_before_connack_is_protocol_error() {
        let now = Instant::now();
        let session = make_session();
        session.begin_connect(now);
        assert_matches!(dispatch_packet(&session, MqttPacket::Publish(publish(1, QualityOfService::AtMostOnce)), now), Err(SchistError::ProtocolError(_)));
    }

    #[test]
    fn qos1_publish_is_delivered_and_acked() {
        let now = Instant::now();
        let session = make_connected_session(now);

        let outcome = dispatch_packet(&session, MqttPacket::Publish(publish(9, QualityOfService::AtLeastOnce)), now).unwrap();
        assert_eq!(vec!(MqttPacket::Puback(PubackPacket::new(9))), outcome.responses);
        assert_matches!(&outcome.events[0], ProtocolEvent::PublishReceived(packet) => {
            assert_eq!("a/b", packet.topic);
        });
    }

    #[test]
    fn inbound_topic_is_normalized() {
        let now = Instant::now();
        let session = make_connected_session(now);

        let mut packet = publish(0, QualityOfService::AtMostOnce);
        packet.topic = "//a///b/".to_string();
        let outcome = dispatch_packet(&session, MqttPacket::Publish(packet), now).unwrap();
        assert_matches!(&outcome.events[0], ProtocolEvent::PublishReceived(packet) => {
            assert_eq!("/a/b", packet.topic);
        });

        let mut empty = publish(0, QualityOfService::AtMostOnce);
        empty.topic = "///".to_string();
        assert_matches!(dispatch_packet(&session, MqttPacket::Publish(empty), now), Err(SchistError::ProtocolError(_)));
    }

    #[test]
    fn qos2_inbound_delivered_exactly_once() {
        let now = Instant::now();
        let session = make_connected_session(now);

        let first = dispatch_packet(&session, MqttPacket::Publish(publish(5, QualityOfService::ExactlyOnce)), now).unwrap();
        assert_eq!(vec!(MqttPacket::Pubrec(PubrecPacket::new(5))), first.responses);
        assert!(first.events.is_empty());

        let mut retried = publish(5, QualityOfService::ExactlyOnce);
        retried.duplicate = true;
        let second = dispatch_packet(&session, MqttPacket::Publish(retried), now).unwrap();
        assert_eq!(vec!(MqttPacket::Pubrec(PubrecPacket::new(5))), second.responses);
        assert!(second.events.is_empty());

        let released = dispatch_packet(&session, MqttPacket::Pubrel(PubrelPacket::new(5)), now).unwrap();
        assert_eq!(vec!(MqttPacket::Pubcomp(PubcompPacket::new(5))), released.responses);
        assert_eq!(1, released.events.len());
        assert_matches!(&released.events[0], ProtocolEvent::PublishReceived(packet) => {
            assert_eq!(5, packet.packet_id);
        });

        let again = dispatch_packet(&session, MqttPacket::Pubrel(PubrelPacket::new(5)), now).unwrap();
        assert_eq!(vec!(MqttPacket::Pubcomp(PubcompPacket::new(5))), again.responses);
        assert!(again.events.is_empty());
    }

    #[test]
    fn qos1_outbound_lifecycle() {
        let now = Instant::now();
        let session = make_connected_session(now);
        lock(&session.store).add_outbound(publish(7, QualityOfService::AtLeastOnce), true, now);

        let outcome = dispatch_packet(&session, MqttPacket::Puback(PubackPacket::new(7)), now).unwrap();
        assert_matches!(outcome.events.as_slice(), [ProtocolEvent::PublishCompleted(7)]);

        let duplicate = dispatch_packet(&session, MqttPacket::Puback(PubackPacket::new(7)), now).unwrap();
        assert!(duplicate.events.is_empty());
        assert!(duplicate.responses.is_empty());
    }

    #[test]
    fn qos2_outbound_handshake() {
        let now = Instant::now();
        let session = make_connected_session(now);
        lock(&session.store).add_outbound(publish(3, QualityOfService::ExactlyOnce), true, now);

        let early = dispatch_packet(&session, MqttPacket::Pubcomp(PubcompPacket::new(3)), now).unwrap();
        assert!(early.events.is_empty());

        let pubrec = dispatch_packet(&session, MqttPacket::Pubrec(PubrecPacket::new(3)), now).unwrap();
        assert_eq!(vec!(MqttPacket::Pubrel(PubrelPacket::new(3))), pubrec.responses);

        let pubcomp = dispatch_packet(&session, MqttPacket::Pubcomp(PubcompPacket::new(3)), now).unwrap();
        assert_matches!(pubcomp.events.as_slice(), [ProtocolEvent::PublishCompleted(3)]);
    }

    #[test]
    fn pingreq_is_answered() {
        let now = Instant::now();
        let session = make_connected_session(now);
        let outcome = dispatch_packet(&session, MqttPacket::Pingreq(PingreqPacket {}), now).unwrap();
        assert_eq!(vec!(MqttPacket::Pingresp(PingrespPacket {})), outcome.responses);
    }

    #[test]
    fn broker_only_packets_are_protocol_errors() {
        let now = Instant::now();
        let session = make_connected_session(now);

        assert_matches!(dispatch_packet(&session, MqttPacket::Connect(ConnectPacket::default()), now), Err(SchistError::ProtocolError(_)));
        assert_matches!(dispatch_packet(&session, MqttPacket::Subscribe(SubscribePacket::new("a", QualityOfService::AtMostOnce)), now), Err(SchistError::ProtocolError(_)));
        assert_matches!(dispatch_packet(&session, MqttPacket::Unsubscribe(UnsubscribePacket::new("a")), now), Err(SchistError::ProtocolError(_)));
        assert_matches!(dispatch_packet(&session, MqttPacket::Disconnect(DisconnectPacket {}), now), Err(SchistError::ProtocolError(_)));
    }

    #[test]
    fn suback_and_unsuback_become_events() {
        let now = Instant::now();
        let session = make_connected_session(now);

        let suback = SubackPacket { packet_id: 2, return_codes: vec!(SubackReturnCode::GrantedQos1) };
        let outcome = dispatch_packet(&session, MqttPacket::Suback(suback.clone()), now).unwrap();
        assert_matches!(&outcome.events[0], ProtocolEvent::SubscribeCompleted(packet) => {
            assert_eq!(&suback, packet);
        });

        let outcome = dispatch_packet(&session, MqttPacket::Unsuback(UnsubackPacket { packet_id: 3 }), now).unwrap();
        assert_matches!(&outcome.events[0], ProtocolEvent::UnsubscribeCompleted(packet) => {
            assert_eq!(3, packet.packet_id);
        });
    }

    #[test]
    fn keepalive_pings_then_times_out() {
        let start = Instant::now();
        let session = make_connected_session(start);

        assert!(check_keepalive(&session, start + Duration::from_secs(5)).unwrap().is_empty());

        let ping_time = start + KEEP_ALIVE;
        assert_eq!(vec!(MqttPacket::Pingreq(PingreqPacket {})), check_keepalive(&session, ping_time).unwrap());

        /* outstanding ping does not produce a second one inside the interval */
        assert!(check_keepalive(&session, ping_time + Duration::from_secs(1)).unwrap().is_empty());

        assert_matches!(check_keepalive(&session, ping_time + KEEP_ALIVE), Err(SchistError::KeepaliveTimeout(_)));
    }

    #[test]
    fn pingresp_clears_outstanding_ping() {
        let start = Instant::now();
        let session = make_connected_session(start);

        let ping_time = start + KEEP_ALIVE;
        assert_eq!(1, check_keepalive(&session, ping_time).unwrap().len());

        dispatch_packet(&session, MqttPacket::Pingresp(PingrespPacket {}), ping_time + Duration::from_secs(1)).unwrap();

        let next = check_keepalive(&session, ping_time + KEEP_ALIVE + Duration::from_secs(1)).unwrap();
        assert_eq!(vec!(MqttPacket::Pingreq(PingreqPacket {})), next);
    }

    #[test]
    fn zero_keepalive_disables_pings() {
        let start = Instant::now();
        let session = SessionState::new("c", Duration::ZERO, Duration::from_secs(5), 0, Duration::from_secs(20));
        session.begin_connect(start);
        dispatch_packet(&session, MqttPacket::Connack(ConnackPacket::default()), start).unwrap();

        assert!(check_keepalive(&session, start + Duration::from_secs(3600)).unwrap().is_empty());
    }

    #[test]
    fn connack_timeout() {
        let start = Instant::now();
        let session = make_session();
        session.begin_connect(start);

        assert!(check_keepalive(&session, start + Duration::from_secs(4)).unwrap().is_empty());
        assert_matches!(check_keepalive(&session, start + Duration::from_secs(5)), Err(SchistError::ConnectionEstablishmentFailure(_)));
    }

    #[test]
    fn keepalive_runs_retry_check() {
        let start = Instant::now();
        let session = SessionState::new("c", Duration::ZERO, Duration::from_secs(5), 0, Duration::from_secs(2));
        session.begin_connect(start);
        dispatch_packet(&session, MqttPacket::Connack(ConnackPacket::default()), start).unwrap();
        lock(&session.store).add_outbound(publish(1, QualityOfService::AtLeastOnce), true, start);

        let packets = check_keepalive(&session, start + Duration::from_secs(3)).unwrap();
        assert_matches!(packets.as_slice(), [MqttPacket::Publish(packet)] => {
            assert!(packet.duplicate);
            assert_eq!(1, packet.packet_id);
        });
    }
}
