/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

extern crate log;

use crate::error::{SchistError, SchistResult};

use log::*;

#[derive(Eq, PartialEq, Debug)]
pub(crate) enum DecodeVliResult<'a> {
    InsufficientData,
    Value(u32, &'a[u8]), /* (decoded value, remaining bytes) */
}

pub(crate) fn decode_vli(buffer: &[u8]) -> SchistResult<DecodeVliResult> {
    let mut value: u32 = 0;
    let mut needs_data: bool;
    let mut shift: u32 = 0;
    let data_len = buffer.len();

    for i in 0..4 {
        if i >= data_len {
            return Ok(DecodeVliResult::InsufficientData);
        }

        let byte = buffer[i];
        value |= ((byte & 0x7F) as u32) << shift;
        shift += 7;

        needs_data = (byte & 0x80) != 0;
        if !needs_data {
            return Ok(DecodeVliResult::Value(value, &buffer[(i + 1)..]));
        }
    }

    error!("Packet Decode - invalid variable length integer");
    Err(SchistError::new_protocol_error("remaining length continuation bit set on the fourth byte"))
}

/// A completely received packet body plus the fixed header byte that introduced it.
///
/// Reads advance an explicit cursor and never go past the declared remaining length.
#[derive(Debug)]
pub(crate) struct InboundPacket {
    command: u8,
    remaining_length: usize,
    payload: Vec<u8>,
    position: usize,
}

impl InboundPacket {
    pub(crate) fn new(command: u8, payload: Vec<u8>) -> InboundPacket {
        InboundPacket {
            command,
            remaining_length: payload.len(),
            payload,
            position: 0,
        }
    }

    pub(crate) fn command(&self) -> u8 {
        self.command
    }

    pub(crate) fn packet_type(&self) -> u8 {
        self.command >> 4
    }

    #[cfg(test)]
    pub(crate) fn remaining_length(&self) -> usize {
        self.remaining_length
    }

    /// Count of body bytes not yet consumed.
    pub(crate) fn remaining(&self) -> usize {
        self.remaining_length - self.position
    }

    fn check_available(&self, length: usize, what: &'static str) -> SchistResult<()> {
        if length > self.remaining() {
            error!("Packet Decode - {} extends past the end of the packet", what);
            return Err(SchistError::new_protocol_error(format!("{} extends past the end of the packet", what)));
        }

        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> SchistResult<u8> {
        self.check_available(1, "byte")?;

        let value = self.payload[self.position];
        self.position += 1;

        Ok(value)
    }

    pub(crate) fn read_u16(&mut self) -> SchistResult<u16> {
        self.check_available(2, "two byte integer")?;

        let value = u16::from_be_bytes([self.payload[self.position], self.payload[self.position + 1]]);
        self.position += 2;

        Ok(value)
    }

    pub(crate) fn read_bytes(&mut self, length: usize) -> SchistResult<Vec<u8>> {
        self.check_available(length, "binary data")?;

        let value = self.payload[self.position..(self.position + length)].to_vec();
        self.position += length;

        Ok(value)
    }

    pub(crate) fn read_length_prefixed_bytes(&mut self) -> SchistResult<Vec<u8>> {
        let length = self.read_u16()? as usize;
        self.read_bytes(length)
    }

    pub(crate) fn read_string(&mut self) -> SchistResult<String> {
        let length = self.read_u16()? as usize;
        self.check_available(length, "utf-8 string")?;

        let value = std::str::from_utf8(&self.payload[self.position..(self.position + length)]).map_err(|err| {
            error!("Packet Decode - invalid utf-8");
            SchistError::from(err)
        })?.to_string();
        self.position += length;

        Ok(value)
    }

    /// Consumes everything left in the packet body.
    pub(crate) fn read_remaining(&mut self) -> Vec<u8> {
        let value = self.payload[self.position..].to_vec();
        self.position = self.remaining_length;

        value
    }
}
