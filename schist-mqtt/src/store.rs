/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
In-flight message records and the per-message QoS state machine.

Records live in a map keyed by (message id, direction); a separate ordered index preserves
insertion order for admission, retry and reconnect scans.  In-flight and queued counts are always
computed from the records themselves.

Store operations never write to the socket.  Every operation that requires a packet to be sent
returns it to the caller, which enqueues it after the store lock has been released.
 */

use crate::error::{SchistError, SchistResult};
use crate::mqtt::*;

use log::*;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum MessageState {

    /// Outbound QoS 1/2 record waiting for in-flight capacity
    Invalid,

    /// Outbound QoS 0 publish that has not been completely written yet
    PublishQos0,

    WaitForPuback,

    WaitForPubrec,

    WaitForPubcomp,

    /// Inbound QoS 2 publish that has been answered with a Pubrec
    WaitForPubrel,
}

impl MessageState {
    fn is_waiting(&self) -> bool {
        matches!(self,
            MessageState::WaitForPuback |
            MessageState::WaitForPubrec |
            MessageState::WaitForPubcomp |
            MessageState::WaitForPubrel
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct MessageKey {
    mid: u16,
    direction: MessageDirection,
}

impl MessageKey {
    fn outbound(mid: u16) -> Self {
        MessageKey { mid, direction: MessageDirection::Outbound }
    }

    fn inbound(mid: u16) -> Self {
        MessageKey { mid, direction: MessageDirection::Inbound }
    }
}

#[derive(Debug)]
struct MessageRecord {
    publish: PublishPacket,
    state: MessageState,

    /// set once the publish has been written at least once; later transmissions carry the dup flag
    duplicate: bool,
    timestamp: Instant,
}

impl MessageRecord {
    fn new(publish: PublishPacket, state: MessageState, now: Instant) -> Self {
        MessageRecord {
            publish,
            state,
            duplicate: false,
            timestamp: now,
        }
    }

    fn transmit_publish(&mut self, now: Instant) -> MqttPacket {
        let mut publish = self.publish.clone();
        publish.duplicate = self.duplicate;

        self.duplicate = true;
        self.timestamp = now;

        MqttPacket::Publish(publish)
    }

    fn armed_state(&self) -> MessageState {
        match self.publish.qos {
            QualityOfService::AtMostOnce => { MessageState::PublishQos0 }
            QualityOfService::AtLeastOnce => { MessageState::WaitForPuback }
            QualityOfService::ExactlyOnce => { MessageState::WaitForPubrec }
        }
    }
}

/// Result of applying an acknowledgement to the store
#[derive(Debug, Default)]
pub(crate) struct StoreUpdate {

    /// outbound message id whose delivery handshake finished
    pub(crate) completed: Option<u16>,

    /// inbound QoS 2 message released for delivery to the application
    pub(crate) delivered: Option<PublishPacket>,

    /// packets the state machine needs written, in order
    pub(crate) packets: Vec<MqttPacket>,
}

pub(crate) struct MessageStore {
    records: HashMap<MessageKey, MessageRecord>,
    order: VecDeque<MessageKey>,
    max_inflight: usize,
    retry_interval: Duration,
    last_mid: u16,
}

impl MessageStore {
    pub(crate) fn new(max_inflight: usize, retry_interval: Duration) -> Self {
        MessageStore {
            records: HashMap::new(),
            order: VecDeque::new(),
            max_inflight,
            retry_interval,
            last_mid: 0,
        }
    }

    /// Outbound QoS 1/2 records currently occupying in-flight capacity
    pub(crate) fn inflight_count(&self) -> usize {
        self.records.iter()
            .filter(|(key, record)| {
                key.direction == MessageDirection::Outbound && record.publish.qos != QualityOfService::AtMostOnce && record.state != MessageState::Invalid
            })
            .count()
    }

    /// Outbound records waiting for in-flight capacity
    pub(crate) fn queued_count(&self) -> usize {
        self.records.iter()
            .filter(|(key, record)| key.direction == MessageDirection::Outbound && record.state == MessageState::Invalid)
            .count()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn contains_outbound(&self, mid: u16) -> bool {
        self.records.contains_key(&MessageKey::outbound(mid))
    }

    fn has_capacity(&self, inflight: usize) -> bool {
        self.max_inflight == 0 || inflight < self.max_inflight
    }

    /// Picks the next free outbound message id.  Zero is never used; `in_use` reports ids held by
    /// operations that live outside the store (subscribes, unsubscribes).
    pub(crate) fn generate_mid<F>(&mut self, in_use: F) -> SchistResult<u16> where F : Fn(u16) -> bool {
        for _ in 0..u16::MAX {
            self.last_mid = self.last_mid.wrapping_add(1);
            if self.last_mid == 0 {
                self.last_mid = 1;
            }

            let mid = self.last_mid;
            if !self.contains_outbound(mid) && !in_use(mid) {
                return Ok(mid);
            }
        }

        error!("MessageStore - no free message ids");
        Err(SchistError::new_internal_state_error("all 65535 message ids are in use"))
    }

    fn insert(&mut self, key: MessageKey, record: MessageRecord) {
        if self.records.insert(key, record).is_none() {
            self.order.push_back(key);
        }
    }

    fn remove(&mut self, key: &MessageKey) -> Option<MessageRecord> {
        let record = self.records.remove(key)?;
        if let Some(position) = self.order.iter().position(|ordered| ordered == key) {
            self.order.remove(position);
        }

        Some(record)
    }

    /// Adds an outbound publish whose packet id has already been assigned.
    ///
    /// QoS 1/2 publishes beyond the in-flight cap are parked in the `Invalid` state.  If
    /// `transmit` is false (no established session yet) an admitted record is armed but its
    /// Publish is left for the reconnect reset to send.
    pub(crate) fn add_outbound(&mut self, publish: PublishPacket, transmit: bool, now: Instant) -> Option<MqttPacket> {
        let key = MessageKey::outbound(publish.packet_id);
        let mut record = MessageRecord::new(publish, MessageState::Invalid, now);

        if record.publish.qos == QualityOfService::AtMostOnce || self.has_capacity(self.inflight_count()) {
            record.state = record.armed_state();
        }

        debug!("MessageStore - adding outbound message {} in state {:?}", key.mid, record.state);

        let packet = if record.state != MessageState::Invalid && transmit {
            Some(record.transmit_publish(now))
        } else {
            None
        };

        self.insert(key, record);

        packet
    }

    /// Records an inbound QoS 2 publish.  Returns false if a record with the same id already
    /// exists, in which case the message must not be delivered again.
    pub(crate) fn add_inbound_qos2(&mut self, publish: PublishPacket, now: Instant) -> bool {
        let key = MessageKey::inbound(publish.packet_id);
        if let Some(record) = self.records.get_mut(&key) {
            record.timestamp = now;
            return false;
        }

        self.insert(key, MessageRecord::new(publish, MessageState::WaitForPubrel, now));
        true
    }

    fn admit_queued(&mut self, now: Instant) -> Vec<MqttPacket> {
        let mut packets = Vec::new();
        let mut inflight = self.inflight_count();

        for key in self.order.iter() {
            if key.direction != MessageDirection::Outbound {
                continue;
            }

            if !self.has_capacity(inflight) {
                break;
            }

            if let Some(record) = self.records.get_mut(key) {
                if record.state == MessageState::Invalid && record.publish.qos != QualityOfService::AtMostOnce {
                    record.state = record.armed_state();
                    debug!("MessageStore - admitting queued message {} as {:?}", key.mid, record.state);
                    packets.push(record.transmit_publish(now));
                    inflight += 1;
                }
            }
        }

        packets
    }

    fn complete_outbound(&mut self, key: &MessageKey, now: Instant) -> StoreUpdate {
        self.remove(key);

        StoreUpdate {
            completed: Some(key.mid),
            delivered: None,
            packets: self.admit_queued(now),
        }
    }

    pub(crate) fn handle_puback(&mut self, mid: u16, now: Instant) -> SchistResult<StoreUpdate> {
        let key = MessageKey::outbound(mid);
        let state = self.records.get(&key).map(|record| record.state).ok_or_else(|| SchistError::new_not_found(mid))?;

        if state != MessageState::WaitForPuback {
            warn!("MessageStore - ignoring Puback for message {} in state {:?}", mid, state);
            return Ok(StoreUpdate::default());
        }

        Ok(self.complete_outbound(&key, now))
    }

    pub(crate) fn handle_pubrec(&mut self, mid: u16, now: Instant) -> SchistResult<StoreUpdate> {
        let record = self.records.get_mut(&MessageKey::outbound(mid)).ok_or_else(|| SchistError::new_not_found(mid))?;

        match record.state {
            MessageState::WaitForPubrec | MessageState::WaitForPubcomp => {
                record.state = MessageState::WaitForPubcomp;
                record.timestamp = now;

                Ok(StoreUpdate {
                    packets: vec!(MqttPacket::Pubrel(PubrelPacket::new(mid))),
                    ..Default::default()
                })
            }
            state => {
                warn!("MessageStore - ignoring Pubrec for message {} in state {:?}", mid, state);
                Ok(StoreUpdate::default())
            }
        }
    }

    pub(crate) fn handle_pubcomp(&mut self, mid: u16, now: Instant) -> SchistResult<StoreUpdate> {
        let key = MessageKey::outbound(mid);
        let state = self.records.get(&key).map(|record| record.state).ok_or_else(|| SchistError::new_not_found(mid))?;

        if state != MessageState::WaitForPubcomp {
            warn!("MessageStore - ignoring Pubcomp for message {} in state {:?}", mid, state);
            return Ok(StoreUpdate::default());
        }

        Ok(self.complete_outbound(&key, now))
    }

    /// Releases an inbound QoS 2 message.  An unknown id yields an empty update; the caller still
    /// answers with Pubcomp.
    pub(crate) fn handle_pubrel(&mut self, mid: u16) -> StoreUpdate {
        StoreUpdate {
            delivered: self.remove(&MessageKey::inbound(mid)).map(|record| record.publish),
            ..Default::default()
        }
    }

    /// Removes a QoS 0 record once its bytes are completely written
    pub(crate) fn complete_qos0(&mut self, mid: u16) -> bool {
        let key = MessageKey::outbound(mid);
        match self.records.get(&key) {
            Some(record) if record.state == MessageState::PublishQos0 => {
                self.remove(&key);
                true
            }
            _ => { false }
        }
    }

    /// Drops every QoS 0 record that never finished writing.  Returns their ids.
    pub(crate) fn drop_qos0(&mut self) -> Vec<u16> {
        let keys : Vec<MessageKey> = self.order.iter()
            .filter(|key| self.records.get(key).map(|record| record.state == MessageState::PublishQos0).unwrap_or(false))
            .copied()
            .collect();

        for key in &keys {
            self.remove(key);
        }

        keys.iter().map(|key| key.mid).collect()
    }

    /// Resends the action of every waiting record whose last activity is older than the retry
    /// interval.
    pub(crate) fn retry_check(&mut self, now: Instant) -> Vec<MqttPacket> {
        let mut packets = Vec::new();

        for key in self.order.iter() {
            let Some(record) = self.records.get_mut(key) else {
                continue;
            };

            if !record.state.is_waiting() || now.saturating_duration_since(record.timestamp) <= self.retry_interval {
                continue;
            }

            debug!("MessageStore - retrying message {} ({:?}) in state {:?}", key.mid, key.direction, record.state);

            match record.state {
                MessageState::WaitForPuback | MessageState::WaitForPubrec => {
                    record.duplicate = true;
                    packets.push(record.transmit_publish(now));
                }
                MessageState::WaitForPubrel => {
                    record.timestamp = now;
                    packets.push(MqttPacket::Pubrec(PubrecPacket::new(key.mid)));
                }
                MessageState::WaitForPubcomp => {
                    record.timestamp = now;
                    packets.push(MqttPacket::Pubrel(PubrelPacket::new(key.mid)));
                }
                _ => {}
            }
        }

        packets
    }

    /// Re-arms the store after a new session has been accepted by the broker.
    ///
    /// Inbound records other than QoS 2 are dropped.  Outbound QoS 1/2 records are re-admitted in
    /// order up to the in-flight cap and every active one is resent; the rest are parked.  Records
    /// waiting for Pubcomp keep their state regardless of the cap since the broker already owns
    /// the message.
    pub(crate) fn reconnect_reset(&mut self, now: Instant) -> Vec<MqttPacket> {
        let dropped : Vec<MessageKey> = self.order.iter()
            .filter(|key| key.direction == MessageDirection::Inbound)
            .filter(|key| self.records.get(key).map(|record| record.publish.qos != QualityOfService::ExactlyOnce).unwrap_or(true))
            .copied()
            .collect();

        for key in &dropped {
            self.remove(key);
        }

        let mut packets = Vec::new();
        let mut inflight = 0;
        let max_inflight = self.max_inflight;

        for key in self.order.iter() {
            let Some(record) = self.records.get_mut(key) else {
                continue;
            };

            record.timestamp = now;
            if key.direction != MessageDirection::Outbound || record.publish.qos == QualityOfService::AtMostOnce {
                continue;
            }

            inflight += 1;
            if record.state == MessageState::WaitForPubcomp {
                packets.push(MqttPacket::Pubrel(PubrelPacket::new(key.mid)));
                continue;
            }

            if max_inflight == 0 || inflight <= max_inflight {
                record.state = record.armed_state();
                packets.push(record.transmit_publish(now));
            } else {
                record.state = MessageState::Invalid;
            }
        }

        info!("MessageStore - reconnect reset resending {} packets, {} messages queued", packets.len(), self.queued_count());

        packets
    }

    #[cfg(test)]
    fn state_of(&self, mid: u16, direction: MessageDirection) -> Option<MessageState> {
        self.records.get(&MessageKey { mid, direction }).map(|record| record.state)
    }
}
