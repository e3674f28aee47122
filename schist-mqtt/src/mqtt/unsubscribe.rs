/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

use crate::decode::*;
use crate::decode::utils::*;
use crate::encode::*;
use crate::encode::utils::*;
use crate::error::{SchistError, SchistResult};
use crate::logging::*;
use crate::mqtt::*;
use crate::mqtt::utils::*;

use log::*;
use std::fmt;

fn compute_unsubscribe_packet_remaining_length(packet: &UnsubscribePacket) -> usize {
    packet.topic_filters.iter().fold(2, |length, filter| length + compute_length_prefixed_length(filter.as_bytes()))
}

pub(crate) fn encode_unsubscribe_packet(packet: &UnsubscribePacket) -> SchistResult<OutboundPacket> {
    if packet.topic_filters.is_empty() {
        error!("UnsubscribePacket Encode - no topic filters");
        return Err(SchistError::new_invalid_argument("unsubscribe packet must contain at least one topic filter"));
    }

    for topic_filter in &packet.topic_filters {
        check_string_length(topic_filter, "unsubscribe topic filter")?;
    }

    let mut outbound = OutboundPacket::new(UNSUBSCRIBE_FIRST_BYTE, compute_unsubscribe_packet_remaining_length(packet))?
        .with_packet_id(packet.packet_id);

    outbound.write_u16(packet.packet_id);
    for topic_filter in &packet.topic_filters {
        outbound.write_string(topic_filter);
    }

    Ok(outbound)
}

pub(crate) fn decode_unsubscribe_packet(packet: &mut InboundPacket) -> SchistResult<MqttPacket> {
    check_first_byte(packet, UNSUBSCRIBE_FIRST_BYTE, "Unsubscribe")?;

    let packet_id = packet.read_u16()?;

    let mut topic_filters = Vec::new();
    while packet.remaining() > 0 {
        topic_filters.push(packet.read_string()?);
    }

    if topic_filters.is_empty() {
        error!("UnsubscribePacket Decode - no topic filters");
        return Err(SchistError::new_protocol_error("unsubscribe packet contains no topic filters"));
    }

    Ok(MqttPacket::Unsubscribe(UnsubscribePacket {
        packet_id,
        topic_filters,
    }))
}

impl fmt::Display for UnsubscribePacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UnsubscribePacket {{")?;
        log_primitive_value!(self.packet_id, f, "packet_id");
        write!(f, " topic_filters: [")?;
        for (i, topic_filter) in self.topic_filters.iter().enumerate() {
            write!(f, " {}:\"{}\"", i, topic_filter)?;
        }
        write!(f, " ] }}")
    }
}
