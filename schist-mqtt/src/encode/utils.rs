/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

///
/// Internal utilities to write MQTT primitive wire types into a pre-sized packet buffer
use crate::error::{SchistError, SchistResult};

pub(crate) const MAXIMUM_VARIABLE_LENGTH_INTEGER: usize = (1 << 28) - 1;

pub(crate) const MAXIMUM_STRING_LENGTH: usize = u16::MAX as usize;

pub(crate) fn compute_variable_length_integer_encode_size(value: usize) -> SchistResult<usize> {
    if value < 1usize << 7 {
        Ok(1)
    } else if value < 1usize << 14 {
        Ok(2)
    } else if value < 1usize << 21 {
        Ok(3)
    } else if value < 1usize << 28 {
        Ok(4)
    } else {
        Err(SchistError::new_payload_too_large(value))
    }
}

pub(crate) fn encode_vli(value: u32, dest: &mut Vec<u8>) -> SchistResult<()> {
    if value as usize > MAXIMUM_VARIABLE_LENGTH_INTEGER {
        return Err(SchistError::new_payload_too_large(value as usize));
    }

    let mut done = false;
    let mut val = value;
    while !done {
        let mut byte: u8 = (val & 0x7F) as u8;
        val /= 128;

        if val != 0 {
            byte |= 128;
        }

        write_u8(dest, byte);

        done = val == 0;
    }

    Ok(())
}

/* Every write assumes the buffer was allocated with the exact encoded size of the packet */
fn debug_check_capacity(dest: &Vec<u8>, additional: usize) {
    debug_assert!(dest.len() + additional <= dest.capacity(), "packet buffer was sized incorrectly");
}

pub(crate) fn write_u8(dest: &mut Vec<u8>, value: u8) {
    debug_check_capacity(dest, 1);
    dest.push(value);
}

pub(crate) fn write_u16(dest: &mut Vec<u8>, value: u16) {
    debug_check_capacity(dest, 2);
    dest.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_bytes(dest: &mut Vec<u8>, value: &[u8]) {
    debug_check_capacity(dest, value.len());
    dest.extend_from_slice(value);
}

pub(crate) fn write_length_prefixed_bytes(dest: &mut Vec<u8>, value: &[u8]) {
    debug_assert!(value.len() <= MAXIMUM_STRING_LENGTH);
    write_u16(dest, value.len() as u16);
    write_bytes(dest, value);
}

pub(crate) fn write_length_prefixed_string(dest: &mut Vec<u8>, value: &str) {
    write_length_prefixed_bytes(dest, value.as_bytes());
}

pub(crate) fn compute_length_prefixed_length(value: &[u8]) -> usize {
    2 + value.len()
}

pub(crate) fn check_string_length(value: &str, field_name: &'static str) -> SchistResult<()> {
    if value.len() > MAXIMUM_STRING_LENGTH {
        let message = format!("{} length ({}) exceeds 65535 bytes", field_name, value.len());
        return Err(SchistError::new_invalid_argument(message));
    }

    Ok(())
}
