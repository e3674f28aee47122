/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/* End to end client tests against an in-process mock broker */

pub(crate) mod mock_server;

use crate::client::*;
use crate::config::*;
use crate::error::SchistError;
use crate::features::threaded::ThreadedClientOptions;
use crate::mqtt::*;
use crate::protocol::ConnectionState;
use crate::testing::mock_server::{BrokerBehavior, MockBroker};

use assert_matches::assert_matches;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const TEST_TIMEOUT : Duration = Duration::from_secs(10);

type EventLog = Arc<Mutex<Vec<Arc<ClientEvent>>>>;

fn recording_listener() -> (ClientEventListener, EventLog) {
    let events : EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let listener = ClientEventListener::Callback(Arc::new(move |event| {
        sink.lock().unwrap().push(event);
    }));

    (listener, events)
}

fn build_client(broker: &MockBroker, client_id: &str, listener: ClientEventListener, client_options: MqttClientOptions) -> MqttClient {
    let connect_options = ConnectOptions::builder()
        .with_client_id(client_id)
        .with_keep_alive_interval_seconds(30)
        .build()
        .unwrap();

    ClientBuilder::new("127.0.0.1", broker.port())
        .with_connect_options(connect_options)
        .with_client_options(client_options)
        .with_event_listener(listener)
        .build()
        .unwrap()
}

/// Drives the client manually until `condition` holds.
fn drive_until<F>(client: &MqttClient, condition: F) where F : Fn() -> bool {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached before timeout");
        let _ = client.loop_once(Duration::from_millis(10));
    }
}

fn wait_until<F>(condition: F) where F : Fn() -> bool {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached before timeout");
        thread::sleep(Duration::from_millis(10));
    }
}

fn count_events<F>(events: &EventLog, filter: F) -> usize where F : Fn(&ClientEvent) -> bool {
    events.lock().unwrap().iter().filter(|event| filter(event)).count()
}

fn received_payloads(events: &EventLog) -> Vec<(String, QualityOfService, Vec<u8>)> {
    events.lock().unwrap().iter()
        .filter_map(|event| match &**event {
            ClientEvent::PublishReceived(received) => {
                Some((received.publish.topic.clone(), received.publish.qos, received.publish.payload.clone()))
            }
            _ => { None }
        })
        .collect()
}

fn connect_and_wait(client: &MqttClient) {
    let connect_result = client.connect().unwrap();
    drive_until(client, || client.connection_state() == ConnectionState::Connected);
    assert_eq!(ConnectReturnCode::Accepted, connect_result.try_recv().unwrap().unwrap());
}

#[test]
fn connect_then_disconnect() {
    let broker = MockBroker::start(BrokerBehavior::default());
    let (listener, events) = recording_listener();
    let client = build_client(&broker, "connect-disconnect", listener, MqttClientOptions::default());

    connect_and_wait(&client);

    client.disconnect().unwrap();
    drive_until(&client, || count_events(&events, |event| matches!(event, ClientEvent::Disconnection(_))) == 1);
    assert_eq!(ConnectionState::New, client.connection_state());

    let events = events.lock().unwrap();
    assert_eq!(2, events.len());
    assert_matches!(&*events[0], ClientEvent::ConnectionResult(result) => {
        assert_eq!(ConnectReturnCode::Accepted, result.return_code);
        assert!(!result.session_present);
    });
    assert_matches!(&*events[1], ClientEvent::Disconnection(DisconnectionEvent { reason: DisconnectReason::Requested }));
    drop(events);

    wait_until(|| broker.received().iter().any(|packet| matches!(packet, MqttPacket::Disconnect(_))));
    assert_matches!(&broker.received()[0], MqttPacket::Connect(connect) => {
        assert_eq!("connect-disconnect", connect.client_id);
    });
}

#[test]
fn publish_round_trip_at_every_qos() {
    let broker = MockBroker::start(BrokerBehavior::default());
    let (listener, events) = recording_listener();
    let client = build_client(&broker, "round-trip", listener, MqttClientOptions::default());

    connect_and_wait(&client);

    let suback = client.subscribe(SubscribePacket::new("test/#", QualityOfService::ExactlyOnce)).unwrap();
    drive_until(&client, || count_events(&events, |event| matches!(event, ClientEvent::SubscribeCompleted(_))) == 1);
    assert_eq!(vec!(SubackReturnCode::GrantedQos2), suback.try_recv().unwrap().unwrap().return_codes);

    let mut results = Vec::new();
    for (index, qos) in [QualityOfService::AtMostOnce, QualityOfService::AtLeastOnce, QualityOfService::ExactlyOnce].into_iter().enumerate() {
        let topic = format!("test/{}", index);
        results.push(client.publish(PublishPacket::new(&topic, qos, format!("payload {}", index).as_bytes())).unwrap());
    }

    drive_until(&client, || {
        count_events(&events, |event| matches!(event, ClientEvent::PublishCompleted(_))) == 3
            && received_payloads(&events).len() == 3
    });

    for result in &results {
        assert_eq!(result.mid(), result.try_recv().unwrap().unwrap());
    }

    let mut received = received_payloads(&events);
    received.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(vec!(
        ("test/0".to_string(), QualityOfService::AtMostOnce, b"payload 0".to_vec()),
        ("test/1".to_string(), QualityOfService::AtLeastOnce, b"payload 1".to_vec()),
        ("test/2".to_string(), QualityOfService::ExactlyOnce, b"payload 2".to_vec()),
    ), received);

    let unsuback = client.unsubscribe(UnsubscribePacket::new("test/#")).unwrap();
    drive_until(&client, || count_events(&events, |event| matches!(event, ClientEvent::UnsubscribeCompleted(_))) == 1);
    assert!(unsuback.try_recv().unwrap().is_ok());

    /* the broker acknowledged our QoS 2 delivery with Pubcomp after our Pubrel */
    wait_until(|| broker.received().iter().any(|packet| matches!(packet, MqttPacket::Pubrel(_))));
    /* and we completed its QoS 2 delivery to us */
    wait_until(|| broker.received().iter().any(|packet| matches!(packet, MqttPacket::Pubcomp(_))));
}

#[test]
fn refused_connection() {
    let broker = MockBroker::start(BrokerBehavior {
        connack_return_code: ConnectReturnCode::NotAuthorized,
        ..Default::default()
    });
    let (listener, events) = recording_listener();
    let client = build_client(&broker, "refused", listener, MqttClientOptions::default());

    let connect_result = client.connect().unwrap();
    drive_until(&client, || count_events(&events, |event| matches!(event, ClientEvent::Disconnection(_))) == 1);

    assert_matches!(connect_result.try_recv(), Some(Err(SchistError::ConnectionRefused(_))));
    assert_eq!(ConnectionState::New, client.connection_state());

    let events = events.lock().unwrap();
    assert_matches!(&*events[0], ClientEvent::ConnectionResult(result) => {
        assert_eq!(ConnectReturnCode::NotAuthorized, result.return_code);
    });
    assert_matches!(&*events[1], ClientEvent::Disconnection(DisconnectionEvent { reason: DisconnectReason::Unexpected(SchistError::ConnectionRefused(_)) }));
}

#[test]
fn listener_may_publish_from_inside_a_callback() {
    let broker = MockBroker::start(BrokerBehavior::default());
    let events : EventLog = Arc::new(Mutex::new(Vec::new()));
    let client_slot : Arc<Mutex<Option<MqttClient>>> = Arc::new(Mutex::new(None));

    let sink = events.clone();
    let slot = client_slot.clone();
    let listener = ClientEventListener::Callback(Arc::new(move |event| {
        if let ClientEvent::ConnectionResult(_) = &*event {
            if let Some(client) = slot.lock().unwrap().as_ref() {
                client.publish(PublishPacket::new("reentrant/topic", QualityOfService::AtLeastOnce, b"from callback")).unwrap();
            }
        }

        sink.lock().unwrap().push(event);
    }));

    let client = build_client(&broker, "reentrant", listener, MqttClientOptions::default());
    *client_slot.lock().unwrap() = Some(client.clone());

    client.connect().unwrap();
    drive_until(&client, || count_events(&events, |event| matches!(event, ClientEvent::PublishCompleted(_))) == 1);

    assert!(broker.received().iter().any(|packet| matches!(packet, MqttPacket::Publish(publish) if publish.payload == b"from callback")));

    /* break the client -> listener -> client cycle */
    client_slot.lock().unwrap().take();
}

#[test]
fn offline_publishes_drain_after_connect() {
    let broker = MockBroker::start(BrokerBehavior::default());
    let (listener, events) = recording_listener();
    let client_options = MqttClientOptions::builder()
        .with_max_inflight_messages(1)
        .build();
    let client = build_client(&broker, "offline-queue", listener, client_options);

    let results : Vec<SyncPublishResult> = (0..3)
        .map(|index| client.publish(PublishPacket::new("offline/topic", QualityOfService::AtLeastOnce, &[index])).unwrap())
        .collect();

    assert!(results.iter().all(|result| result.try_recv().is_none()));

    client.connect().unwrap();
    drive_until(&client, || count_events(&events, |event| matches!(event, ClientEvent::PublishCompleted(_))) == 3);

    for result in &results {
        assert_eq!(result.mid(), result.try_recv().unwrap().unwrap());
    }

    let payloads : Vec<Vec<u8>> = broker.received().iter()
        .filter_map(|packet| match packet {
            MqttPacket::Publish(publish) => { Some(publish.payload.clone()) }
            _ => { None }
        })
        .collect();
    assert_eq!(vec!(vec!(0u8), vec!(1u8), vec!(2u8)), payloads);
}

#[test]
fn publish_queued_while_offline_survives_a_clean_session_reconnect() {
    let broker = MockBroker::start(BrokerBehavior::default());
    let (listener, events) = recording_listener();
    let client = build_client(&broker, "offline-reconnect", listener, MqttClientOptions::default());

    connect_and_wait(&client);

    broker.drop_connections();
    drive_until(&client, || count_events(&events, |event| matches!(event, ClientEvent::Disconnection(_))) == 1);

    let result = client.publish(PublishPacket::new("offline/reconnect", QualityOfService::AtLeastOnce, b"kept")).unwrap();
    assert!(result.try_recv().is_none());

    client.connect().unwrap();
    drive_until(&client, || count_events(&events, |event| matches!(event, ClientEvent::PublishCompleted(_))) == 1);

    assert_matches!(result.try_recv(), Some(Ok(mid)) => {
        assert_eq!(result.mid(), mid);
    });
    assert_eq!(2, broker.connections_accepted());
    assert!(broker.received().iter().any(|packet| matches!(packet, MqttPacket::Publish(publish) if publish.payload == b"kept")));
}

#[test]
fn qos0_publish_requires_a_session() {
    let broker = MockBroker::start(BrokerBehavior::default());
    let (listener, _events) = recording_listener();
    let client = build_client(&broker, "qos0-offline", listener, MqttClientOptions::default());

    assert_matches!(client.publish(PublishPacket::new("a/b", QualityOfService::AtMostOnce, b"x")), Err(SchistError::NoConnection(_)));
    assert_matches!(client.subscribe(SubscribePacket::new("a/#", QualityOfService::AtMostOnce)), Err(SchistError::NoConnection(_)));
}

#[test]
fn threaded_client_reconnects_after_connection_loss() {
    let broker = MockBroker::start(BrokerBehavior::default());
    let (listener, events) = recording_listener();
    let client_options = MqttClientOptions::builder()
        .with_base_reconnect_period(Duration::from_millis(100))
        .with_max_reconnect_period(Duration::from_secs(1))
        .build();

    let connect_options = ConnectOptions::builder()
        .with_client_id("threaded-reconnect")
        .build()
        .unwrap();

    let client = ClientBuilder::new("127.0.0.1", broker.port())
        .with_connect_options(connect_options)
        .with_client_options(client_options)
        .with_threaded_options(ThreadedClientOptions::builder().with_idle_service_sleep(Duration::from_millis(2)).build())
        .with_event_listener(listener)
        .build()
        .unwrap();

    client.loop_start().unwrap();
    assert_matches!(client.loop_start(), Err(SchistError::InvalidArgument(_)));

    let connect_result = client.connect().unwrap();
    assert_eq!(ConnectReturnCode::Accepted, connect_result.recv_timeout(TEST_TIMEOUT).unwrap().unwrap());

    broker.drop_connections();

    wait_until(|| count_events(&events, |event| matches!(event, ClientEvent::Disconnection(_))) == 1);
    wait_until(|| count_events(&events, |event| matches!(event, ClientEvent::ConnectionResult(_))) == 2);
    assert_eq!(2, broker.connections_accepted());
    wait_until(|| client.connection_state() == ConnectionState::Connected);

    client.loop_stop(true).unwrap();
    assert_eq!(ConnectionState::New, client.connection_state());
    assert_matches!(client.loop_stop(false), Err(SchistError::InvalidArgument(_)));

    let events = events.lock().unwrap();
    assert_matches!(&**events.last().unwrap(), ClientEvent::Disconnection(DisconnectionEvent { reason: DisconnectReason::Unexpected(SchistError::ClientClosed(_)) }));
}

#[cfg(feature = "testing")]
#[test]
fn keepalive_timeout_without_pingresp() {
    let broker = MockBroker::start(BrokerBehavior {
        respond_to_pings: false,
        ..Default::default()
    });
    let (listener, events) = recording_listener();
    let connect_options = ConnectOptions::builder()
        .with_client_id("keepalive")
        .with_keep_alive_interval_seconds(1)
        .build()
        .unwrap();

    let client = ClientBuilder::new("127.0.0.1", broker.port())
        .with_connect_options(connect_options)
        .with_event_listener(listener)
        .build()
        .unwrap();

    connect_and_wait(&client);
    drive_until(&client, || count_events(&events, |event| matches!(event, ClientEvent::Disconnection(_))) == 1);

    assert!(broker.received().iter().any(|packet| matches!(packet, MqttPacket::Pingreq(_))));
    let events = events.lock().unwrap();
    assert_matches!(&**events.last().unwrap(), ClientEvent::Disconnection(DisconnectionEvent { reason: DisconnectReason::Unexpected(SchistError::KeepaliveTimeout(_)) }));
}
