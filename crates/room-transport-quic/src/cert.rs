//! Identity-bound TLS for room connections.
//!
//! Every node presents a self-signed certificate whose subject public key IS
//! its Ed25519 identity key. Both sides of the handshake verify the peer
//! chain down to that key instead of consulting a certificate authority:
//! the server accepts any well-formed identity certificate (and attests the
//! identity it carried), while the client pins the server certificate to the
//! identity it dialed, carried in the SNI.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use room_proto::{Identity, Keypair, ALPN};
use room_transport::{TransportError, TransportResult};

static CRYPTO_PROVIDER: std::sync::LazyLock<Arc<rustls::crypto::CryptoProvider>> =
    std::sync::LazyLock::new(|| Arc::new(rustls::crypto::ring::default_provider()));

/// Builds a self-signed certificate embedding the keypair's Ed25519 key.
///
/// rcgen wants the secret key in PKCS#8 form, so the raw 32-byte seed is
/// wrapped in the fixed DER envelope for Ed25519 (RFC 8410) by hand.
pub fn generate_identity_cert(
    keypair: &Keypair,
) -> TransportResult<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let secret_key = keypair.secret_bytes();
    let public_key = keypair.public_bytes();

    const ED25519_OID: [u8; 5] = [0x06, 0x03, 0x2b, 0x65, 0x70];
    const PKCS8_VERSION: [u8; 3] = [0x02, 0x01, 0x00];

    let mut pkcs8 = Vec::with_capacity(48);
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    pkcs8.extend_from_slice(&PKCS8_VERSION);
    pkcs8.extend_from_slice(&[0x30, 0x05]);
    pkcs8.extend_from_slice(&ED25519_OID);
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(&secret_key);

    let pkcs8_der = PrivatePkcs8KeyDer::from(pkcs8.clone());
    let key_pair = rcgen::KeyPair::try_from(&pkcs8_der)
        .map_err(|e| TransportError::Tls(format!("failed to load identity key: {}", e)))?;

    let mut params = rcgen::CertificateParams::new(vec!["room".to_string()])
        .map_err(|e| TransportError::Tls(format!("failed to create certificate params: {}", e)))?;

    params.distinguished_name.push(
        rcgen::DnType::CommonName,
        rcgen::DnValue::Utf8String(hex::encode(public_key)),
    );

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| TransportError::Tls(format!("failed to self-sign certificate: {}", e)))?;

    let key = PrivateKeyDer::Pkcs8(pkcs8.into());
    let cert_der = CertificateDer::from(cert.der().to_vec());

    Ok((vec![cert_der], key))
}

/// rustls server config requiring an identity certificate from every client.
pub(crate) fn server_crypto(keypair: &Keypair) -> TransportResult<rustls::ServerConfig> {
    let (certs, key) = generate_identity_cert(keypair)?;

    let mut config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(Arc::new(ClientIdentityVerifier))
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::Tls(format!("failed to create server TLS config: {}", e)))?;
    config.alpn_protocols = vec![ALPN.to_vec()];

    Ok(config)
}

/// rustls client config presenting our identity certificate and pinning the
/// server certificate to the identity named in the SNI.
pub(crate) fn client_crypto(keypair: &Keypair) -> TransportResult<rustls::ClientConfig> {
    let (certs, key) = generate_identity_cert(keypair)?;

    let mut config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PinnedServerVerifier))
        .with_client_auth_cert(certs, key)
        .map_err(|e| TransportError::Tls(format!("failed to create client TLS config: {}", e)))?;
    config.alpn_protocols = vec![ALPN.to_vec()];

    Ok(config)
}

/// Encodes an identity as the server name for a dial.
///
/// The 64 hex chars split into two DNS labels so rustls accepts the name;
/// the pinned verifier joins them back together.
pub(crate) fn identity_server_name(identity: &Identity) -> String {
    let hex = identity.to_hex();
    format!("{}.{}", &hex[..32], &hex[32..])
}

fn identity_from_server_name(name: &str) -> Option<Identity> {
    let hex_str: String = name.split('.').collect();
    let bytes = hex::decode(&hex_str).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Some(Identity::from_bytes(arr))
}

pub(crate) fn extract_public_key_from_cert(cert_der: &[u8]) -> Option<[u8; 32]> {
    use x509_parser::prelude::*;

    let (_, cert) = X509Certificate::from_der(cert_der).ok()?;

    let spki = cert.public_key();
    let key_bytes = &spki.subject_public_key.data;

    if key_bytes.len() == 32 {
        let mut key = [0u8; 32];
        key.copy_from_slice(key_bytes);
        Some(key)
    } else {
        None
    }
}

/// Reads the peer's attested identity off a completed handshake.
///
/// Returns `None` when the peer presented no certificate, which on the
/// server side means the client skipped client auth.
pub fn extract_verified_identity(connection: &quinn::Connection) -> Option<Identity> {
    let peer_identity = connection.peer_identity()?;
    let certs: &Vec<rustls::pki_types::CertificateDer> = peer_identity.downcast_ref()?;
    let cert_der = certs.first()?.as_ref();
    let public_key = extract_public_key_from_cert(cert_der)?;
    Some(Identity::from_bytes(public_key))
}

/// Accepts any client certificate carrying a well-formed Ed25519 identity.
///
/// Membership and authorization decisions happen above the transport; this
/// verifier only guarantees the attested identity owns its key.
#[derive(Debug)]
struct ClientIdentityVerifier;

impl rustls::server::danger::ClientCertVerifier for ClientIdentityVerifier {
    fn root_hint_subjects(&self) -> &[rustls::DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::server::danger::ClientCertVerified, rustls::Error> {
        let public_key = extract_public_key_from_cert(end_entity.as_ref()).ok_or(
            rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding),
        )?;

        let identity = Identity::from_bytes(public_key);
        if !identity.is_valid() {
            return Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ));
        }

        Ok(rustls::server::danger::ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &CRYPTO_PROVIDER.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &CRYPTO_PROVIDER.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![rustls::SignatureScheme::ED25519]
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }
}

/// Requires the server certificate to carry exactly the identity the client
/// dialed. The expected identity travels in the SNI, so the verifier itself
/// is stateless and one client config serves every room.
#[derive(Debug)]
struct PinnedServerVerifier;

impl rustls::client::danger::ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        let expected_name = match server_name {
            rustls::pki_types::ServerName::DnsName(name) => name.as_ref(),
            _ => {
                return Err(rustls::Error::InvalidCertificate(
                    rustls::CertificateError::ApplicationVerificationFailure,
                ));
            }
        };

        let expected_identity = identity_from_server_name(expected_name).ok_or(
            rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding),
        )?;

        let public_key = extract_public_key_from_cert(end_entity.as_ref()).ok_or(
            rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding),
        )?;

        let actual_identity = Identity::from_bytes(public_key);
        if actual_identity != expected_identity {
            return Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::NotValidForName,
            ));
        }

        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &CRYPTO_PROVIDER.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &CRYPTO_PROVIDER.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![rustls::SignatureScheme::ED25519]
    }
}
