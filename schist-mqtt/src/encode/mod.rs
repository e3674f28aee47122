/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

pub(crate) mod utils;

use crate::encode::utils::*;
use crate::error::{SchistError, SchistResult};
use crate::logging::*;
use crate::mqtt::*;
use crate::mqtt::ack::*;
use crate::mqtt::connack::*;
use crate::mqtt::connect::*;
use crate::mqtt::publish::*;
use crate::mqtt::simple::*;
use crate::mqtt::suback::*;
use crate::mqtt::subscribe::*;
use crate::mqtt::unsuback::*;
use crate::mqtt::unsubscribe::*;
use crate::mqtt::utils::*;

/// A fully framed packet waiting to be written to the transport.
///
/// The buffer is allocated once, with the exact encoded size, when the fixed header is written.
/// `position` tracks how much of the buffer the transport has accepted so far.
#[derive(Debug)]
pub(crate) struct OutboundPacket {
    command: u8,
    packet_id: Option<u16>,
    total_length: usize,
    buffer: Vec<u8>,
    position: usize,
}

impl OutboundPacket {

    /// Allocates the packet buffer and writes the fixed header.
    pub(crate) fn new(command: u8, remaining_length: usize) -> SchistResult<OutboundPacket> {
        let vli_length = compute_variable_length_integer_encode_size(remaining_length)?;
        let total_length = 1 + vli_length + remaining_length;

        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(total_length).is_err() {
            return Err(SchistError::new_out_of_memory(total_length));
        }

        write_u8(&mut buffer, command);
        encode_vli(remaining_length as u32, &mut buffer)?;

        Ok(OutboundPacket {
            command,
            packet_id: None,
            total_length,
            buffer,
            position: 0,
        })
    }

    pub(crate) fn with_packet_id(mut self, packet_id: u16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    pub(crate) fn write_u8(&mut self, value: u8) {
        write_u8(&mut self.buffer, value);
    }

    pub(crate) fn write_u16(&mut self, value: u16) {
        write_u16(&mut self.buffer, value);
    }

    pub(crate) fn write_string(&mut self, value: &str) {
        write_length_prefixed_string(&mut self.buffer, value);
    }

    pub(crate) fn write_length_prefixed_bytes(&mut self, value: &[u8]) {
        write_length_prefixed_bytes(&mut self.buffer, value);
    }

    pub(crate) fn write_bytes(&mut self, value: &[u8]) {
        write_bytes(&mut self.buffer, value);
    }

    pub(crate) fn packet_type(&self) -> u8 {
        self.command >> 4
    }

    pub(crate) fn packet_id(&self) -> Option<u16> {
        self.packet_id
    }

    /// A publish whose QoS bits are zero; no acknowledgement will ever arrive for it.
    pub(crate) fn is_qos0_publish(&self) -> bool {
        self.packet_type() == PACKET_TYPE_PUBLISH && (self.command >> 1) & QOS_MASK == 0
    }

    pub(crate) fn is_fully_encoded(&self) -> bool {
        self.buffer.len() == self.total_length
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Bytes the transport has not yet accepted.
    pub(crate) fn unwritten(&self) -> &[u8] {
        &self.buffer[self.position..]
    }

    pub(crate) fn advance(&mut self, written: usize) {
        self.position = usize::min(self.position + written, self.buffer.len());
    }

    pub(crate) fn is_fully_written(&self) -> bool {
        self.position >= self.buffer.len()
    }
}

/// Frames a packet into a buffer ready for transmission.
pub(crate) fn encode_packet(mqtt_packet: &MqttPacket) -> SchistResult<OutboundPacket> {
    log_packet("Encoding packet: ", mqtt_packet);

    let packet = match mqtt_packet {
        MqttPacket::Connect(packet) => { encode_connect_packet(packet) }
        MqttPacket::Connack(packet) => { encode_connack_packet(packet) }
        MqttPacket::Publish(packet) => { encode_publish_packet(packet) }
        MqttPacket::Puback(packet) => { encode_puback_packet(packet) }
        MqttPacket::Pubrec(packet) => { encode_pubrec_packet(packet) }
        MqttPacket::Pubrel(packet) => { encode_pubrel_packet(packet) }
        MqttPacket::Pubcomp(packet) => { encode_pubcomp_packet(packet) }
        MqttPacket::Subscribe(packet) => { encode_subscribe_packet(packet) }
        MqttPacket::Suback(packet) => { encode_suback_packet(packet) }
        MqttPacket::Unsubscribe(packet) => { encode_unsubscribe_packet(packet) }
        MqttPacket::Unsuback(packet) => { encode_unsuback_packet(packet) }
        MqttPacket::Pingreq(packet) => { encode_pingreq_packet(packet) }
        MqttPacket::Pingresp(packet) => { encode_pingresp_packet(packet) }
        MqttPacket::Disconnect(packet) => { encode_disconnect_packet(packet) }
    }?;

    debug_assert!(packet.is_fully_encoded());

    Ok(packet)
}
