/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Module that encompasses feature-specific logic (TLS implementations and the background network thread).
 */

#[cfg(feature = "threaded-rustls")]
pub mod schist_rustls;

#[cfg(feature = "threaded-native-tls")]
pub(crate) mod schist_native_tls;

pub mod threaded;
