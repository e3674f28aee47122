/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
A small thread-per-connection MQTT broker for exercising the client end to end.  It speaks the
crate's own codec and keeps just enough state to route publishes back to a subscribed connection.
 */

use crate::decode::{decode_packet, Decoder};
use crate::encode::encode_packet;
use crate::error::SchistResult;
use crate::mqtt::*;
use crate::topic::topic_matches_sub;

use log::*;

use std::io::{ErrorKind, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const POLL_INTERVAL : Duration = Duration::from_millis(5);
const READ_TIMEOUT : Duration = Duration::from_millis(20);

#[derive(Clone, Debug)]
pub(crate) struct BrokerBehavior {
    pub(crate) connack_return_code: ConnectReturnCode,
    pub(crate) session_present: bool,
    pub(crate) respond_to_pings: bool,
}

impl Default for BrokerBehavior {
    fn default() -> Self {
        BrokerBehavior {
            connack_return_code: ConnectReturnCode::Accepted,
            session_present: false,
            respond_to_pings: true,
        }
    }
}

#[derive(Default)]
struct BrokerState {
    connections_accepted: usize,
    received: Vec<MqttPacket>,
    streams: Vec<TcpStream>,
}

pub(crate) struct MockBroker {
    port: u16,
    state: Arc<Mutex<BrokerState>>,
    stopped: Arc<AtomicBool>,
}

struct ConnectionHandler {
    stream: TcpStream,
    behavior: BrokerBehavior,
    state: Arc<Mutex<BrokerState>>,
    stopped: Arc<AtomicBool>,
    subscriptions: Vec<Subscription>,
    next_packet_id: u16,
}

impl ConnectionHandler {
    fn send(&mut self, packet: MqttPacket) -> SchistResult<()> {
        let encoded = encode_packet(&packet)?;
        self.stream.write_all(encoded.as_bytes())?;
        Ok(())
    }

    fn route_publish(&mut self, publish: &PublishPacket) -> SchistResult<()> {
        let granted = self.subscriptions.iter()
            .filter(|subscription| topic_matches_sub(&subscription.topic_filter, &publish.topic))
            .map(|subscription| subscription.qos)
            .max_by_key(|qos| *qos as u8);

        let Some(granted) = granted else {
            return Ok(());
        };

        let mut forwarded = publish.clone();
        forwarded.duplicate = false;
        forwarded.qos = if (granted as u8) < (publish.qos as u8) { granted } else { publish.qos };
        forwarded.packet_id = 0;
        if forwarded.qos != QualityOfService::AtMostOnce {
            self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
            forwarded.packet_id = self.next_packet_id;
        }

        self.send(MqttPacket::Publish(forwarded))
    }

    fn handle_packet(&mut self, packet: MqttPacket) -> SchistResult<bool> {
        self.state.lock().unwrap().received.push(packet.clone());

        match packet {
            MqttPacket::Connect(_) => {
                self.send(MqttPacket::Connack(ConnackPacket {
                    session_present: self.behavior.session_present,
                    return_code: self.behavior.connack_return_code,
                }))?;

                if self.behavior.connack_return_code != ConnectReturnCode::Accepted {
                    return Ok(false);
                }
            }
            MqttPacket::Publish(publish) => {
                match publish.qos {
                    QualityOfService::AtMostOnce => {}
                    QualityOfService::AtLeastOnce => { self.send(MqttPacket::Puback(PubackPacket::new(publish.packet_id)))?; }
                    QualityOfService::ExactlyOnce => { self.send(MqttPacket::Pubrec(PubrecPacket::new(publish.packet_id)))?; }
                }

                self.route_publish(&publish)?;
            }
            MqttPacket::Pubrel(pubrel) => {
                self.send(MqttPacket::Pubcomp(PubcompPacket::new(pubrel.packet_id)))?;
            }
            MqttPacket::Pubrec(pubrec) => {
                self.send(MqttPacket::Pubrel(PubrelPacket::new(pubrec.packet_id)))?;
            }
            MqttPacket::Subscribe(subscribe) => {
                let return_codes = subscribe.subscriptions.iter()
                    .map(|subscription| match subscription.qos {
                        QualityOfService::AtMostOnce => { SubackReturnCode::GrantedQos0 }
                        QualityOfService::AtLeastOnce => { SubackReturnCode::GrantedQos1 }
                        QualityOfService::ExactlyOnce => { SubackReturnCode::GrantedQos2 }
                    })
                    .collect();

                self.subscriptions.extend(subscribe.subscriptions.iter().cloned());
                self.send(MqttPacket::Suback(SubackPacket { packet_id: subscribe.packet_id, return_codes }))?;
            }
            MqttPacket::Unsubscribe(unsubscribe) => {
                self.subscriptions.retain(|subscription| !unsubscribe.topic_filters.contains(&subscription.topic_filter));
                self.send(MqttPacket::Unsuback(UnsubackPacket { packet_id: unsubscribe.packet_id }))?;
            }
            MqttPacket::Pingreq(_) => {
                if self.behavior.respond_to_pings {
                    self.send(MqttPacket::Pingresp(PingrespPacket {}))?;
                }
            }
            MqttPacket::Disconnect(_) => {
                return Ok(false);
            }
            _ => {}
        }

        Ok(true)
    }

    fn run(mut self) {
        let mut decoder = Decoder::new();
        let mut reader = match self.stream.try_clone() {
            Ok(reader) => { reader }
            Err(_) => { return; }
        };

        while !self.stopped.load(Ordering::SeqCst) {
            let inbound = match decoder.read_packet(&mut reader) {
                Ok(Some(inbound)) => { inbound }
                Ok(None) => { continue; }
                Err(error) => {
                    debug!("MockBroker - connection ended: {}", error);
                    break;
                }
            };

            let keep_going = decode_packet(inbound).and_then(|packet| self.handle_packet(packet));
            match keep_going {
                Ok(true) => {}
                Ok(false) => { break; }
                Err(error) => {
                    debug!("MockBroker - closing connection after error: {}", error);
                    break;
                }
            }
        }

        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl MockBroker {
    pub(crate) fn start(behavior: BrokerBehavior) -> MockBroker {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let port = listener.local_addr().unwrap().port();

        let state = Arc::new(Mutex::new(BrokerState::default()));
        let stopped = Arc::new(AtomicBool::new(false));

        let accept_state = state.clone();
        let accept_stopped = stopped.clone();
        thread::spawn(move || {
            while !accept_stopped.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(false).unwrap();
                        stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
                        stream.set_nodelay(true).unwrap();

                        {
                            let mut state = accept_state.lock().unwrap();
                            state.connections_accepted += 1;
                            state.streams.push(stream.try_clone().unwrap());
                        }

                        let handler = ConnectionHandler {
                            stream,
                            behavior: behavior.clone(),
                            state: accept_state.clone(),
                            stopped: accept_stopped.clone(),
                            subscriptions: Vec::new(),
                            next_packet_id: 0,
                        };

                        thread::spawn(move || handler.run());
                    }
                    Err(error) if error.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(POLL_INTERVAL);
                    }
                    Err(_) => { return; }
                }
            }
        });

        MockBroker {
            port,
            state,
            stopped,
        }
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn connections_accepted(&self) -> usize {
        self.state.lock().unwrap().connections_accepted
    }

    pub(crate) fn received(&self) -> Vec<MqttPacket> {
        self.state.lock().unwrap().received.clone()
    }

    /// Severs every connection accepted so far without sending anything.
    pub(crate) fn drop_connections(&self) {
        let streams = std::mem::take(&mut self.state.lock().unwrap().streams);
        for stream in streams {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.drop_connections();
    }
}
