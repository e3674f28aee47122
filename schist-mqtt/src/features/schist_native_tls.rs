/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Functionality for using [`native-tls`](https://crates.io/crates/native-tls) as an MQTT client's TLS
implementation.
 */

use crate::config::*;
use crate::error::{SchistError, SchistResult};

use log::*;

use std::net::TcpStream;
use std::sync::Arc;

impl TlsOptionsBuilder {

    /// Builds client TLS options using the `native-tls` crate
    ///
    /// If using MTLS, native-tls only supports pkcs8 format private keys.  If your private key is in a different
    /// format, you must first convert it to pkcs8 and instead use that.
    pub fn build_native_tls(&self) -> SchistResult<TlsOptions> {
        let mut builder = native_tls::TlsConnector::builder();

        if let Some(root_ca_bytes) = &self.root_ca_bytes {
            builder.disable_built_in_roots(true);

            let root = native_tls::Certificate::from_pem(root_ca_bytes.as_slice())?;
            builder.add_root_certificate(root);
        }

        if self.mode == TlsMode::Mtls {
            let (Some(certificate_bytes), Some(private_key_bytes)) = (&self.certificate_bytes, &self.private_key_bytes) else {
                return Err(SchistError::new_tls_error("mutual tls requires both a certificate and a private key"));
            };

            let identity = native_tls::Identity::from_pkcs8(certificate_bytes, private_key_bytes)?;
            builder.identity(identity);
        }

        let alpn = self.alpn.as_ref().map(|alpn| String::from_utf8_lossy(alpn).to_string());
        if let Some(alpn) = &alpn {
            builder.request_alpns(&[alpn.as_str()]);
        }

        builder.danger_accept_invalid_certs(!self.verify_peer);
        builder.danger_accept_invalid_hostnames(self.insecure);

        let connector = builder.build()?;

        Ok(TlsOptions {
            options: TlsData::NativeTls(Arc::new(connector))
        })
    }
}

pub(crate) fn make_native_tls_stream(connector: &native_tls::TlsConnector, host: &str, stream: TcpStream) -> SchistResult<native_tls::TlsStream<TcpStream>> {
    connector.connect(host, stream).map_err(|error| {
        error!("native-tls - handshake with {} failed: {}", host, error);
        SchistError::new_tls_error(error.to_string())
    })
}
