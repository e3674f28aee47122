/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Functionality for using [`rustls`](https://crates.io/crates/rustls) as an MQTT client's TLS
implementation.

Certificate chains are checked by rustls' webpki verifier.  The broker identity check is done here:
subject alternative name DNS and IP entries are tried first, and the subject common name is only
consulted when the certificate carries no DNS entries at all.
 */

extern crate rustls;
extern crate rustls_pemfile;
extern crate rustls_pki_types;

use crate::config::{TlsData, TlsMode, TlsOptions, TlsOptionsBuilder};
use crate::error::{SchistError, SchistResult};

use log::*;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};
use x509_parser::extensions::GeneralName;

use std::net::{IpAddr, TcpStream};
use std::sync::Arc;

impl TlsOptionsBuilder {

    /// Builds client TLS options using the `rustls` crate
    pub fn build_rustls(&self) -> SchistResult<TlsOptions> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let root_cert_store = if self.verify_peer {
            build_root_ca_store(self.root_ca_bytes.as_deref())?
        } else {
            RootCertStore::empty()
        };

        let verifier = Arc::new(BrokerCertificateVerifier {
            roots: Arc::new(root_cert_store),
            provider: provider.clone(),
            verify_peer: self.verify_peer,
            verify_hostname: !self.insecure,
        });

        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let mut config =
            match self.mode {
                TlsMode::Standard => {
                    builder.with_no_client_auth()
                }
                TlsMode::Mtls => {
                    let certs = build_certs(self.certificate_bytes.as_deref().unwrap_or_default())?;
                    let private_key = build_private_key(self.private_key_bytes.as_deref().unwrap_or_default())?;
                    builder.with_client_auth_cert(certs, private_key)?
                }
            };

        config.alpn_protocols = Vec::new();
        if let Some(alpn) = &self.alpn {
            config.alpn_protocols.push(alpn.clone());
        }

        Ok(TlsOptions {
            options: TlsData::Rustls(Arc::new(config))
        })
    }
}

fn build_root_ca_store(root_ca_bytes: Option<&[u8]>) -> SchistResult<RootCertStore> {
    let mut root_cert_store = RootCertStore::empty();
    if let Some(root_ca_bytes) = root_ca_bytes {
        let mut pem = std::io::BufReader::new(root_ca_bytes);
        for cert in rustls_pemfile::certs(&mut pem) {
            root_cert_store.add(cert.map_err(SchistError::new_tls_error)?)?;
        }
    } else {
        let system_certs = rustls_native_certs::load_native_certs().map_err(SchistError::new_tls_error)?;
        let (added, ignored) = root_cert_store.add_parsable_certificates(system_certs);
        debug!("rustls - loaded {} platform root certificates ({} ignored)", added, ignored);
    }

    if root_cert_store.is_empty() {
        error!("rustls - no trust roots available");
        return Err(SchistError::new_tls_error("no trusted root certificates available"));
    }

    Ok(root_cert_store)
}

fn build_private_key(key_bytes: &[u8]) -> SchistResult<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(key_bytes);

    loop {
        let read_pem_result = rustls_pemfile::read_one(&mut reader);
        match read_pem_result {
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => return Ok(key.into()),
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => return Ok(key.into()),
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => return Ok(key.into()),
            Ok(None) => { return Err(SchistError::new_tls_error("no valid private keys found")); }
            Ok(_) => {}
            Err(_) => { return Err(SchistError::new_tls_error("failed to parse private key pem file")); }
        }
    }
}

fn build_certs(certificate_bytes: &[u8]) -> SchistResult<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(certificate_bytes);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<CertificateDer<'static>>, std::io::Error>>()
        .map_err(SchistError::new_tls_error)?;

    if certs.is_empty() {
        return Err(SchistError::new_tls_error("no certificates found in certificate pem"));
    }

    Ok(certs)
}

pub(crate) fn make_rustls_stream(config: Arc<ClientConfig>, host: &str, stream: TcpStream) -> SchistResult<StreamOwned<ClientConnection, TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())?;
    let connection = ClientConnection::new(config, server_name)?;
    let mut tls_stream = StreamOwned::new(connection, stream);

    while tls_stream.conn.is_handshaking() {
        tls_stream.conn.complete_io(&mut tls_stream.sock).map_err(|error| {
            error!("rustls - handshake with {} failed: {}", host, error);
            SchistError::new_tls_error(error)
        })?;
    }

    Ok(tls_stream)
}

#[derive(Debug)]
struct BrokerCertificateVerifier {
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
    verify_peer: bool,
    verify_hostname: bool,
}

fn server_name_to_host(server_name: &ServerName<'_>) -> Option<String> {
    match server_name {
        ServerName::DnsName(name) => { Some(name.as_ref().to_string()) }
        ServerName::IpAddress(address) => { Some(IpAddr::from(*address).to_string()) }
        _ => { None }
    }
}

impl ServerCertVerifier for BrokerCertificateVerifier {
    fn verify_server_cert(&self, end_entity: &CertificateDer<'_>, intermediates: &[CertificateDer<'_>], server_name: &ServerName<'_>, _ocsp_response: &[u8], now: UnixTime) -> Result<ServerCertVerified, rustls::Error> {
        if !self.verify_peer {
            warn!("rustls - peer verification disabled; accepting broker certificate unchecked");
            return Ok(ServerCertVerified::assertion());
        }

        let certificate = ParsedCertificate::try_from(end_entity)?;
        rustls::client::verify_server_cert_signed_by_trust_anchor(&certificate, &self.roots, intermediates, now, self.provider.signature_verification_algorithms.all)?;

        if self.verify_hostname {
            let host = server_name_to_host(server_name).ok_or(rustls::Error::InvalidCertificate(CertificateError::NotValidForName))?;
            if !verify_certificate_hostname(end_entity.as_ref(), &host) {
                error!("rustls - broker certificate does not match host \"{}\"", host);
                return Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName));
            }
        }

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(&self, message: &[u8], cert: &CertificateDer<'_>, dss: &DigitallySignedStruct) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(&self, message: &[u8], cert: &CertificateDer<'_>, dss: &DigitallySignedStruct) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Checks a DER certificate's identity against the host the client connected to.
pub(crate) fn verify_certificate_hostname(certificate_der: &[u8], host: &str) -> bool {
    let Ok((_, certificate)) = x509_parser::parse_x509_certificate(certificate_der) else {
        return false;
    };

    let mut dns_names = Vec::new();
    let mut ip_addresses = Vec::new();
    if let Ok(Some(san)) = certificate.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(dns_name) => { dns_names.push(dns_name.to_string()); }
                GeneralName::IPAddress(address) => { ip_addresses.push(address.to_vec()); }
                _ => {}
            }
        }
    }

    let common_name = certificate.subject()
        .iter_common_name()
        .next()
        .and_then(|attribute| attribute.as_str().ok())
        .map(|common_name| common_name.to_string());

    certificate_matches_host(&dns_names, &ip_addresses, common_name.as_deref(), host)
}

pub(crate) fn certificate_matches_host(dns_names: &[String], ip_addresses: &[Vec<u8>], common_name: Option<&str>, host: &str) -> bool {
    if dns_names.iter().any(|dns_name| dns_name.eq_ignore_ascii_case(host)) {
        return true;
    }

    let host_address = match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(address)) => { Some(address.octets().to_vec()) }
        Ok(IpAddr::V6(address)) => { Some(address.octets().to_vec()) }
        Err(_) => { None }
    };

    if let Some(host_address) = &host_address {
        if ip_addresses.iter().any(|address| (address.len() == 4 || address.len() == 16) && address == host_address) {
            return true;
        }
    }

    /* a certificate that names itself through SAN DNS entries never falls back to the common name */
    if !dns_names.is_empty() {
        return false;
    }

    common_name.map(|common_name| common_name.eq_ignore_ascii_case(host)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAN_DNS_CERT : &str = "-----BEGIN CERTIFICATE-----
MIIBsDCCAVagAwIBAgIURs0Gvo2jPLQAljg6bpAOMVlgPjUwCgYIKoZIzj0EAwIw
HTEbMBkGA1UEAwwSYnJva2VyLmV4YW1wbGUuY29tMCAXDTI2MTAxNjIwNDkxN1oY
DzIxMjYwOTIyMjA0OTE3WjAdMRswGQYDVQQDDBJicm9rZXIuZXhhbXBsZS5jb20w
WTATBgcqhkjOPQIBBggqhkjOPQMBBwNCAASPqMWbeIH/knpQTYhGLNbVyehaKyaD
nRMh3QnUikOGADpyjtFKLRo0SZrRdWF3rXLtThhqVOfbrQd2V5dyyqwYo3IwcDAd
BgNVHQ4EFgQUX9c11uB5hfuh7TPvJPOWcuBZ9bgwHwYDVR0jBBgwFoAUX9c11uB5
hfuh7TPvJPOWcuBZ9bgwDwYDVR0TAQH/BAUwAwEB/zAdBgNVHREEFjAUghJCcm9r
ZXIuRXhhbXBsZS5jb20wCgYIKoZIzj0EAwIDSAAwRQIhAM5XoBYiVTPPSdy3svzi
jgsT9BEnyn2lnmYJbFPYyaJQAiBQpAKUuAi6vNGos7mC7S25HeGEUzSMy+2erzgq
idvZpA==
-----END CERTIFICATE-----
";

    /* SAN DNS names other.example.com, subject CN is broker.example.com */
    const SAN_MISMATCH_CERT : &str = "-----BEGIN CERTIFICATE-----
MIIBsDCCAVWgAwIBAgIUH9JceXQy0RB4mrZD5Wxt8dMGddMwCgYIKoZIzj0EAwIw
HTEbMBkGA1UEAwwSYnJva2VyLmV4YW1wbGUuY29tMCAXDTI2MTAxNjIwNDkxN1oY
DzIxMjYwOTIyMjA0OTE3WjAdMRswGQYDVQQDDBJicm9rZXIuZXhhbXBsZS5jb20w
WTATBgcqhkjOPQIBBggqhkjOPQMBBwNCAASPqMWbeIH/knpQTYhGLNbVyehaKyaD
nRMh3QnUikOGADpyjtFKLRo0SZrRdWF3rXLtThhqVOfbrQd2V5dyyqwYo3EwbzAd
BgNVHQ4EFgQUX9c11uB5hfuh7TPvJPOWcuBZ9bgwHwYDVR0jBBgwFoAUX9c11uB5
hfuh7TPvJPOWcuBZ9bgwDwYDVR0TAQH/BAUwAwEB/zAcBgNVHREEFTATghFvdGhl
ci5leGFtcGxlLmNvbTAKBggqhkjOPQQDAgNJADBGAiEA5rpI5Ech9kEeK2y7c9tU
fAVQgXxnBt3xfDdJeSA6vAMCIQC8GDoOCFYg16+Rl0RTptg7fw383G3fz4NqDBiF
emlvFQ==
-----END CERTIFICATE-----
";

    const CN_ONLY_CERT : &str = "-----BEGIN CERTIFICATE-----
MIIBkDCCATegAwIBAgIUZ8GEP72sz6cbrfKuzarTXqWW0PcwCgYIKoZIzj0EAwIw
HTEbMBkGA1UEAwwSYnJva2VyLmV4YW1wbGUuY29tMCAXDTI2MTAxNjIwNDkxN1oY
DzIxMjYwOTIyMjA0OTE3WjAdMRswGQYDVQQDDBJicm9rZXIuZXhhbXBsZS5jb20w
WTATBgcqhkjOPQIBBggqhkjOPQMBBwNCAASPqMWbeIH/knpQTYhGLNbVyehaKyaD
nRMh3QnUikOGADpyjtFKLRo0SZrRdWF3rXLtThhqVOfbrQd2V5dyyqwYo1MwUTAd
BgNVHQ4EFgQUX9c11uB5hfuh7TPvJPOWcuBZ9bgwHwYDVR0jBBgwFoAUX9c11uB5
hfuh7TPvJPOWcuBZ9bgwDwYDVR0TAQH/BAUwAwEB/zAKBggqhkjOPQQDAgNHADBE
AiBglVTIlitrvyipESinb/QDeB3TU0eZWaKxM65ll1yvDwIgMBlO8IBjPb3+kBkN
jhfmPlDakntmzrAH1ETkWG/oy1I=
-----END CERTIFICATE-----
";

    /* SAN IP 127.0.0.1 only, subject CN is broker.example.com */
    const SAN_IP_CERT : &str = "-----BEGIN CERTIFICATE-----
MIIBojCCAUigAwIBAgIULdvjsuEPV+jTThhhlPm1a3fhB1AwCgYIKoZIzj0EAwIw
HTEbMBkGA1UEAwwSYnJva2VyLmV4YW1wbGUuY29tMCAXDTI2MTAxNjIwNDkxN1oY
DzIxMjYwOTIyMjA0OTE3WjAdMRswGQYDVQQDDBJicm9rZXIuZXhhbXBsZS5jb20w
WTATBgcqhkjOPQIBBggqhkjOPQMBBwNCAASPqMWbeIH/knpQTYhGLNbVyehaKyaD
nRMh3QnUikOGADpyjtFKLRo0SZrRdWF3rXLtThhqVOfbrQd2V5dyyqwYo2QwYjAd
BgNVHQ4EFgQUX9c11uB5hfuh7TPvJPOWcuBZ9bgwHwYDVR0jBBgwFoAUX9c11uB5
hfuh7TPvJPOWcuBZ9bgwDwYDVR0TAQH/BAUwAwEB/zAPBgNVHREECDAGhwR/AAAB
MAoGCCqGSM49BAMCA0gAMEUCIHbCb6tW8ufSyaf/qTkF74t2Gsm/eni8mnQufG0G
sFXXAiEAvBdhO6sg+kr6OKdMPw2Hk0iJulZR3w7JHNbLQDc1Vno=
-----END CERTIFICATE-----
";

    fn der_from_pem(pem: &str) -> Vec<u8> {
        let mut reader = std::io::BufReader::new(pem.as_bytes());
        let der = rustls_pemfile::certs(&mut reader).next().unwrap().unwrap().as_ref().to_vec();
        der
    }

    #[test]
    fn san_dns_match_is_case_insensitive() {
        let der = der_from_pem(SAN_DNS_CERT);
        assert!(verify_certificate_hostname(&der, "broker.example.com"));
        assert!(verify_certificate_hostname(&der, "BROKER.example.COM"));
        assert!(!verify_certificate_hostname(&der, "other.example.com"));
    }

    #[test]
    fn san_dns_mismatch_blocks_common_name_fallback() {
        let der = der_from_pem(SAN_MISMATCH_CERT);
        assert!(!verify_certificate_hostname(&der, "broker.example.com"));
        assert!(verify_certificate_hostname(&der, "other.example.com"));
    }

    #[test]
    fn common_name_used_without_san() {
        let der = der_from_pem(CN_ONLY_CERT);
        assert!(verify_certificate_hostname(&der, "broker.example.com"));
        assert!(!verify_certificate_hostname(&der, "elsewhere.example.com"));
    }

    #[test]
    fn san_ip_match() {
        let der = der_from_pem(SAN_IP_CERT);
        assert!(verify_certificate_hostname(&der, "127.0.0.1"));
        assert!(!verify_certificate_hostname(&der, "127.0.0.2"));

        /* IP-only SAN leaves the common name available */
        assert!(verify_certificate_hostname(&der, "broker.example.com"));
    }

    #[test]
    fn matching_rules_without_certificates() {
        let v6 = "::1".parse::<std::net::Ipv6Addr>().unwrap().octets().to_vec();
        assert!(certificate_matches_host(&[], &[v6], None, "::1"));
        assert!(!certificate_matches_host(&[], &[vec!(127, 0, 0)], None, "127.0.0.0"));
        assert!(!certificate_matches_host(&[], &[], None, "broker"));
        assert!(!certificate_matches_host(&["*.example.com".to_string()], &[], None, "a.example.com"));
    }

    #[test]
    fn garbage_der_never_matches() {
        assert!(!verify_certificate_hostname(&[0x30, 0x03, 0x01, 0x01, 0xFF], "broker.example.com"));
    }

    #[test]
    fn build_with_custom_root() {
        let options = TlsOptionsBuilder::new()
            .with_root_ca_from_memory(CN_ONLY_CERT.as_bytes())
            .with_alpn(b"mqtt")
            .build_rustls()
            .unwrap();

        match options.options {
            TlsData::Rustls(config) => { assert_eq!(vec!(b"mqtt".to_vec()), config.alpn_protocols); }
            #[allow(unreachable_patterns)]
            _ => { panic!("expected a rustls context"); }
        }
    }

    #[test]
    fn build_mtls_without_key_fails() {
        let result = TlsOptionsBuilder::new_with_mtls_from_memory(SAN_DNS_CERT.as_bytes(), b"")
            .with_root_ca_from_memory(CN_ONLY_CERT.as_bytes())
            .build_rustls();

        assert!(matches!(result, Err(SchistError::TlsError(_))));
    }
}
