/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
A module containing the core crate error enumeration, context structures, and conversion
definitions.
 */

use crate::mqtt::ConnectReturnCode;

use std::error::Error;
use std::fmt;

/// Additional details about an InvalidArgument error variant
#[derive(Debug)]
pub struct InvalidArgumentContext {
    source: Box<dyn Error + Send + Sync + 'static>
}

/// Additional details about an OutOfMemory error variant
#[derive(Debug)]
pub struct OutOfMemoryContext {

    /// number of bytes that could not be allocated
    pub requested: usize,
}

/// Additional details about a ProtocolError error variant
#[derive(Debug)]
pub struct ProtocolErrorContext {
    source: Box<dyn Error + Send + Sync + 'static>
}

/// Additional details about a ConnectionLost error variant
#[derive(Debug)]
pub struct ConnectionLostContext {
    source: Box<dyn Error + Send + Sync + 'static>
}

/// Additional details about a WouldBlock error variant
#[derive(Debug)]
pub struct WouldBlockContext {
}

/// Additional details about a PayloadTooLarge error variant
#[derive(Debug)]
pub struct PayloadTooLargeContext {

    /// size, in bytes, that exceeded the encodable maximum
    pub length: usize,
}

/// Additional details about a TlsError error variant
#[derive(Debug)]
pub struct TlsErrorContext {
    source: Box<dyn Error + Send + Sync + 'static>
}

/// Additional details about a NotFound error variant
#[derive(Debug)]
pub struct NotFoundContext {

    /// message id that did not correspond to an in-flight record
    pub packet_id: u16,
}

/// Additional details about a ConnectionRefused error variant
#[derive(Debug)]
pub struct ConnectionRefusedContext {

    /// return code the broker sent in its Connack packet
    pub return_code: ConnectReturnCode,
}

/// Additional details about a NoConnection error variant
#[derive(Debug)]
pub struct NoConnectionContext {
}

/// Additional details about a KeepaliveTimeout error variant
#[derive(Debug)]
pub struct KeepaliveTimeoutContext {
}

/// Additional details about a ConnectionEstablishmentFailure error variant
#[derive(Debug)]
pub struct ConnectionEstablishmentFailureContext {
    source: Box<dyn Error + Send + Sync + 'static>
}

/// Additional details about a StdIoError error variant
#[derive(Debug)]
pub struct StdIoErrorContext {
    source: Box<dyn Error + Send + Sync + 'static>
}

/// Additional details about a ClientClosed error variant
#[derive(Debug)]
pub struct ClientClosedContext {
}

/// Additional details about an InternalStateError error variant
#[derive(Debug)]
pub struct InternalStateErrorContext {
    source: Box<dyn Error + Send + Sync + 'static>
}

/// Basic error type for the entire schist-mqtt crate.
#[derive(Debug)]
#[non_exhaustive]
pub enum SchistError {

    /// A caller supplied a malformed or out-of-range argument.  Always a caller bug.
    InvalidArgument(InvalidArgumentContext),

    /// A packet buffer could not be allocated.
    OutOfMemory(OutOfMemoryContext),

    /// Wire data that is malformed or that violates the MQTT 3.1/3.1.1 specification.  Fatal
    /// to the connection it arrived on.
    ProtocolError(ProtocolErrorContext),

    /// The peer closed or reset the connection.
    ConnectionLost(ConnectionLostContext),

    /// A non-blocking read or write could not make progress.  Absorbed by the transport and
    /// packet layers; never returned from the public client API.
    WouldBlock(WouldBlockContext),

    /// A packet's remaining length would exceed what the variable length integer encoding
    /// can express (268,435,455 bytes).
    PayloadTooLarge(PayloadTooLargeContext),

    /// Error associated with building a TLS context or performing a TLS handshake, including
    /// certificate chain and hostname verification failures.
    TlsError(TlsErrorContext),

    /// An acknowledgement referenced a message id with no matching in-flight record.
    NotFound(NotFoundContext),

    /// The broker answered the Connect packet with a non-zero return code.
    ConnectionRefused(ConnectionRefusedContext),

    /// An operation needs a live transport and there is none.
    NoConnection(NoConnectionContext),

    /// A full keep alive interval elapsed after a Pingreq without a Pingresp.
    KeepaliveTimeout(KeepaliveTimeoutContext),

    /// Address resolution, socket creation, or the transport connect failed.
    ConnectionEstablishmentFailure(ConnectionEstablishmentFailureContext),

    /// Generic error wrapping std::io::Error when no more specialized variant applies
    StdIoError(StdIoErrorContext),

    /// Applied to pending operation results that were abandoned because the client shut down.
    ClientClosed(ClientClosedContext),

    /// Error emitted by the client when something happens that should never happen.  Always indicates
    /// a bug in the client.
    InternalStateError(InternalStateErrorContext),
}

impl SchistError {

    pub(crate) fn new_invalid_argument(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        SchistError::InvalidArgument(
            InvalidArgumentContext {
                source : source.into()
            }
        )
    }

    pub(crate) fn new_out_of_memory(requested: usize) -> Self {
        SchistError::OutOfMemory(
            OutOfMemoryContext {
                requested
            }
        )
    }

    pub(crate) fn new_protocol_error(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        SchistError::ProtocolError(
            ProtocolErrorContext {
                source : source.into()
            }
        )
    }

    pub(crate) fn new_connection_lost(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        SchistError::ConnectionLost(
            ConnectionLostContext {
                source : source.into()
            }
        )
    }

    pub(crate) fn new_would_block() -> Self {
        SchistError::WouldBlock(
            WouldBlockContext {
            }
        )
    }

    pub(crate) fn new_payload_too_large(length: usize) -> Self {
        SchistError::PayloadTooLarge(
            PayloadTooLargeContext {
                length
            }
        )
    }

    /// Constructs a new TlsError variant from an existing error.  Typically this should be
    /// an error surfacing from a third-party TLS library or an attempt to initialize configuration
    /// for one.
    #[doc(hidden)]
    pub fn new_tls_error(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        SchistError::TlsError(
            TlsErrorContext {
                source : source.into()
            }
        )
    }

    pub(crate) fn new_not_found(packet_id: u16) -> Self {
        SchistError::NotFound(
            NotFoundContext {
                packet_id
            }
        )
    }

    pub(crate) fn new_connection_refused(return_code: ConnectReturnCode) -> Self {
        SchistError::ConnectionRefused(
            ConnectionRefusedContext {
                return_code
            }
        )
    }

    pub(crate) fn new_no_connection() -> Self {
        SchistError::NoConnection(
            NoConnectionContext {
            }
        )
    }

    pub(crate) fn new_keepalive_timeout() -> Self {
        SchistError::KeepaliveTimeout(
            KeepaliveTimeoutContext {
            }
        )
    }

    pub(crate) fn new_connection_establishment_failure(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        SchistError::ConnectionEstablishmentFailure(
            ConnectionEstablishmentFailureContext {
                source : source.into()
            }
        )
    }

    /// Constructs a StdIoError variant from an existing error.  Typically this should be a
    /// std::io::Error
    #[doc(hidden)]
    pub fn new_std_io_error(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        SchistError::StdIoError(
            StdIoErrorContext {
                source : source.into()
            }
        )
    }

    pub(crate) fn new_client_closed() -> Self {
        SchistError::ClientClosed(
            ClientClosedContext {
            }
        )
    }

    pub(crate) fn new_internal_state_error(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        SchistError::InternalStateError(
            InternalStateErrorContext {
                source : source.into()
            }
        )
    }

    /// Returns true if this error should tear down the connection it was raised on.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self,
            SchistError::ProtocolError(_) |
            SchistError::ConnectionLost(_) |
            SchistError::StdIoError(_) |
            SchistError::TlsError(_) |
            SchistError::KeepaliveTimeout(_) |
            SchistError::OutOfMemory(_)
        )
    }

    /// Rebuilds an equivalent error so one failure can be both returned to the caller and
    /// carried by a disconnection event.  Wrapped sources are reduced to their text.
    pub(crate) fn replicate(&self) -> SchistError {
        let description = self.source().map(|source| source.to_string()).unwrap_or_else(|| self.to_string());

        match self {
            SchistError::InvalidArgument(_) => { SchistError::new_invalid_argument(description) }
            SchistError::OutOfMemory(context) => { SchistError::new_out_of_memory(context.requested) }
            SchistError::ProtocolError(_) => { SchistError::new_protocol_error(description) }
            SchistError::ConnectionLost(_) => { SchistError::new_connection_lost(description) }
            SchistError::WouldBlock(_) => { SchistError::new_would_block() }
            SchistError::PayloadTooLarge(context) => { SchistError::new_payload_too_large(context.length) }
            SchistError::TlsError(_) => { SchistError::new_tls_error(description) }
            SchistError::NotFound(context) => { SchistError::new_not_found(context.packet_id) }
            SchistError::ConnectionRefused(context) => { SchistError::new_connection_refused(context.return_code) }
            SchistError::NoConnection(_) => { SchistError::new_no_connection() }
            SchistError::KeepaliveTimeout(_) => { SchistError::new_keepalive_timeout() }
            SchistError::ConnectionEstablishmentFailure(_) => { SchistError::new_connection_establishment_failure(description) }
            SchistError::StdIoError(_) => { SchistError::new_std_io_error(description) }
            SchistError::ClientClosed(_) => { SchistError::new_client_closed() }
            SchistError::InternalStateError(_) => { SchistError::new_internal_state_error(description) }
        }
    }
}

impl Error for SchistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SchistError::InvalidArgument(context) => {
                Some(context.source.as_ref())
            }
            SchistError::ProtocolError(context) => {
                Some(context.source.as_ref())
            }
            SchistError::ConnectionLost(context) => {
                Some(context.source.as_ref())
            }
            SchistError::TlsError(context) => {
                Some(context.source.as_ref())
            }
            SchistError::ConnectionEstablishmentFailure(context) => {
                Some(context.source.as_ref())
            }
            SchistError::StdIoError(context) => {
                Some(context.source.as_ref())
            }
            SchistError::InternalStateError(context) => {
                Some(context.source.as_ref())
            }
            _ => { None }
        }
    }
}

impl fmt::Display for SchistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchistError::InvalidArgument(_) => {
                write!(f, "invalid argument; source contains further details")
            }
            SchistError::OutOfMemory(context) => {
                write!(f, "unable to allocate {} bytes", context.requested)
            }
            SchistError::ProtocolError(_) => {
                write!(f, "broker behavior disallowed by the mqtt spec")
            }
            SchistError::ConnectionLost(_) => {
                write!(f, "connection to the broker was lost")
            }
            SchistError::WouldBlock(_) => {
                write!(f, "non-blocking io operation could not make progress")
            }
            SchistError::PayloadTooLarge(context) => {
                write!(f, "length {} exceeds the maximum mqtt remaining length", context.length)
            }
            SchistError::TlsError(_) => {
                write!(f, "tls configuration or handshake failure; source contains further details")
            }
            SchistError::NotFound(context) => {
                write!(f, "no in-flight message with id {}", context.packet_id)
            }
            SchistError::ConnectionRefused(context) => {
                write!(f, "broker refused the connection: {}", context.return_code)
            }
            SchistError::NoConnection(_) => {
                write!(f, "operation requires a connection and the client is not connected")
            }
            SchistError::KeepaliveTimeout(_) => {
                write!(f, "broker did not respond to a ping within the keep alive interval")
            }
            SchistError::ConnectionEstablishmentFailure(_) => {
                write!(f, "failed to establish a connection to the broker")
            }
            SchistError::StdIoError(_) => {
                write!(f, "generic error wrapper for std::io::Error when no more specialized error is appropriate; source contains further details")
            }
            SchistError::ClientClosed(_) => {
                write!(f, "the operation was incomplete prior to the client being closed")
            }
            SchistError::InternalStateError(_) => {
                write!(f, "client reached an invalid internal state; almost certainly a client bug")
            }
        }
    }
}

impl From<std::io::Error> for SchistError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::WouldBlock => {
                SchistError::new_would_block()
            }
            std::io::ErrorKind::ConnectionReset |
            std::io::ErrorKind::ConnectionAborted |
            std::io::ErrorKind::BrokenPipe |
            std::io::ErrorKind::UnexpectedEof |
            std::io::ErrorKind::NotConnected => {
                SchistError::new_connection_lost(error)
            }
            _ => {
                SchistError::new_std_io_error(error)
            }
        }
    }
}

impl From<core::str::Utf8Error> for SchistError {
    fn from(err: core::str::Utf8Error) -> Self {
        SchistError::new_protocol_error(err)
    }
}

#[cfg(feature = "threaded-rustls")]
impl From<rustls_pki_types::InvalidDnsNameError> for SchistError {
    fn from(err: rustls_pki_types::InvalidDnsNameError) -> Self {
        SchistError::new_connection_establishment_failure(err)
    }
}

#[cfg(feature = "threaded-rustls")]
impl From<rustls::Error> for SchistError {
    fn from(err: rustls::Error) -> Self {
        SchistError::new_tls_error(err)
    }
}

#[cfg(feature = "threaded-native-tls")]
impl From<native_tls::Error> for SchistError {
    fn from(err: native_tls::Error) -> Self {
        SchistError::new_tls_error(err)
    }
}

#[cfg(feature = "threaded-native-tls")]
impl<S> From<native_tls::HandshakeError<S>> for SchistError {
    fn from(err: native_tls::HandshakeError<S>) -> Self {
        match err {
            native_tls::HandshakeError::Failure(error) => {
                SchistError::new_tls_error(error)
            }
            native_tls::HandshakeError::WouldBlock(_) => {
                SchistError::new_tls_error("native-tls handshake interrupted while the socket was non-blocking")
            }
        }
    }
}

/// Crate-wide result type for functions that can fail
pub type SchistResult<T> = Result<T, SchistError>;
