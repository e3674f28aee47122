/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

pub(crate) mod utils;

extern crate log;

use crate::decode::utils::*;
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

use log::*;

use std::io::{ErrorKind, Read};

const DECODE_SCRATCH_SIZE : usize = 4;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum DecoderState {
    ReadPacketType,
    ReadTotalRemainingLength,
    ReadPacketBody,
    TerminalError
}

/// Streaming packet reader.
///
/// Each step (command byte, remaining length, body) can be interrupted by a non-blocking source
/// that has no more data; the next call resumes exactly where the previous one stopped.
pub(crate) struct Decoder {
    state: DecoderState,

    scratch: Vec<u8>,

    first_byte: Option<u8>,

    body: Vec<u8>,

    body_read: usize,
}

/// Reads into `buffer`, translating the source's transient conditions.  `Ok(None)` means no
/// data is available right now.
fn read_some<R: Read>(source: &mut R, buffer: &mut [u8]) -> SchistResult<Option<usize>> {
    loop {
        match source.read(buffer) {
            Ok(0) => {
                return Err(SchistError::new_connection_lost("end of stream while reading a packet"));
            }
            Ok(bytes_read) => {
                return Ok(Some(bytes_read));
            }
            Err(error) => {
                match error.kind() {
                    ErrorKind::Interrupted => {}
                    ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                        return Ok(None);
                    }
                    _ => {
                        return Err(error.into());
                    }
                }
            }
        }
    }
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder {
            state: DecoderState::ReadPacketType,
            scratch : Vec::<u8>::with_capacity(DECODE_SCRATCH_SIZE),
            first_byte : None,
            body : Vec::new(),
            body_read : 0,
        }
    }

    pub fn reset_for_new_connection(&mut self) {
        self.reset();
    }

    fn process_read_packet_type<R: Read>(&mut self, source: &mut R) -> SchistResult<bool> {
        let mut byte = [0u8; 1];
        if read_some(source, &mut byte)?.is_none() {
            return Ok(false);
        }

        self.first_byte = Some(byte[0]);
        self.state = DecoderState::ReadTotalRemainingLength;

        Ok(true)
    }

    fn process_read_total_remaining_length<R: Read>(&mut self, source: &mut R) -> SchistResult<bool> {
        let mut byte = [0u8; 1];
        if read_some(source, &mut byte)?.is_none() {
            return Ok(false);
        }

        self.scratch.push(byte[0]);

        if let DecodeVliResult::Value(remaining_length, _) = decode_vli(&self.scratch)? {
            let remaining_length = remaining_length as usize;

            let mut body = Vec::new();
            if body.try_reserve_exact(remaining_length).is_err() {
                error!("Packet Decode - unable to allocate {} bytes for packet body", remaining_length);
                return Err(SchistError::new_out_of_memory(remaining_length));
            }
            body.resize(remaining_length, 0);

            self.body = body;
            self.body_read = 0;
            self.scratch.clear();
            self.state = DecoderState::ReadPacketBody;
        }

        Ok(true)
    }

    fn process_read_packet_body<R: Read>(&mut self, source: &mut R) -> SchistResult<bool> {
        if self.body_read < self.body.len() {
            return match read_some(source, &mut self.body[self.body_read..])? {
                Some(bytes_read) => {
                    self.body_read += bytes_read;
                    Ok(true)
                }
                None => { Ok(false) }
            };
        }

        Ok(true)
    }

    /// Pulls bytes from `source` until a complete packet is assembled or the source runs dry.
    pub fn read_packet<R: Read>(&mut self, source: &mut R) -> SchistResult<Option<InboundPacket>> {
        let result = self.read_packet_internal(source);
        if result.is_err() {
            self.state = DecoderState::TerminalError;
        }

        result
    }

    fn read_packet_internal<R: Read>(&mut self, source: &mut R) -> SchistResult<Option<InboundPacket>> {
        loop {
            let made_progress = match self.state {
                DecoderState::ReadPacketType => {
                    self.process_read_packet_type(source)?
                }

                DecoderState::ReadTotalRemainingLength => {
                    self.process_read_total_remaining_length(source)?
                }

                DecoderState::ReadPacketBody => {
                    if self.body_read == self.body.len() {
                        let first_byte = self.first_byte.ok_or_else(|| SchistError::new_internal_state_error("decoder lost the packet's first byte"))?;
                        let body = std::mem::take(&mut self.body);
                        self.reset();

                        return Ok(Some(InboundPacket::new(first_byte, body)));
                    }

                    self.process_read_packet_body(source)?
                }

                DecoderState::TerminalError => {
                    return Err(SchistError::new_protocol_error("decoder is in a terminal state; the connection must be reset"));
                }
            };

            if !made_progress {
                return Ok(None);
            }
        }
    }

    fn reset(&mut self) {
        self.state = DecoderState::ReadPacketType;
        self.scratch.clear();
        self.first_byte = None;
        self.body = Vec::new();
        self.body_read = 0;
    }
}

/// Converts a complete inbound packet into its typed representation.
pub(crate) fn decode_packet(mut packet: InboundPacket) -> SchistResult<MqttPacket> {
    let packet_type = packet.packet_type();

    debug!("Decoding a packet of type {}", packet_type_to_str(packet_type));

    let decoded = match packet_type {
        PACKET_TYPE_CONNECT => { decode_connect_packet(&mut packet) }
        PACKET_TYPE_CONNACK => { decode_connack_packet(&mut packet) }
        PACKET_TYPE_PUBLISH => { decode_publish_packet(&mut packet) }
        PACKET_TYPE_PUBACK => { decode_puback_packet(&mut packet) }
        PACKET_TYPE_PUBREC => { decode_pubrec_packet(&mut packet) }
        PACKET_TYPE_PUBREL => { decode_pubrel_packet(&mut packet) }
        PACKET_TYPE_PUBCOMP => { decode_pubcomp_packet(&mut packet) }
        PACKET_TYPE_SUBSCRIBE => { decode_subscribe_packet(&mut packet) }
        PACKET_TYPE_SUBACK => { decode_suback_packet(&mut packet) }
        PACKET_TYPE_UNSUBSCRIBE => { decode_unsubscribe_packet(&mut packet) }
        PACKET_TYPE_UNSUBACK => { decode_unsuback_packet(&mut packet) }
        PACKET_TYPE_PINGREQ => { decode_pingreq_packet(&mut packet) }
        PACKET_TYPE_PINGRESP => { decode_pingresp_packet(&mut packet) }
        PACKET_TYPE_DISCONNECT => { decode_disconnect_packet(&mut packet) }
        _ => {
            error!("Packet Decode - unknown packet type {}", packet_type);
            Err(SchistError::new_protocol_error(format!("unknown packet type {}", packet_type)))
        }
    }?;

    if packet.remaining() != 0 {
        error!("Packet Decode - {} bytes left over after decoding {}", packet.remaining(), packet_type_to_str(packet_type));
        return Err(SchistError::new_protocol_error("packet body longer than its fields"));
    }

    log_packet("Successfully decoded incoming packet: ", &decoded);

    Ok(decoded)
}

/// Fails with a protocol error unless the fixed header byte is exactly `expected`.
pub(crate) fn check_first_byte(packet: &InboundPacket, expected: u8, packet_name: &'static str) -> SchistResult<()> {
    if packet.command() != expected {
        error!("{}Packet Decode - invalid first byte", packet_name);
        return Err(SchistError::new_protocol_error(format!("invalid fixed header flags for {}", packet_name)));
    }

    Ok(())
}
