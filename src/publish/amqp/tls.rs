// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::errors::TransportError;
use crate::publish::amqp::{AmqpSettings, BrokerCredential, BrokerEndpoint};

/// Build the connector for `endpoint`: trust the configured CA and, for an
/// x509 credential, present the client certificate.
pub(crate) fn connector(
    endpoint: &BrokerEndpoint,
    settings: &AmqpSettings,
) -> Result<(TlsConnector, ServerName<'static>), TransportError> {
    let tls_error = |reason: String| TransportError::Tls {
        endpoint: endpoint.to_string(),
        reason,
    };

    let ca = settings
        .trust_anchor()
        .ok_or_else(|| tls_error("no CA bundle configured".to_string()))?;
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca).map_err(tls_error)? {
        roots
            .add(cert)
            .map_err(|e| tls_error(format!("bad CA certificate in {}: {}", ca.display(), e)))?;
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error(e.to_string()))?
        .with_root_certificates(roots);

    let config = match &settings.credential {
        BrokerCredential::X509 { cert, key, .. } => {
            let chain = load_certs(cert).map_err(tls_error)?;
            let key = load_key(key).map_err(tls_error)?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| tls_error(e.to_string()))?
        }
        BrokerCredential::Plain { .. } => builder.with_no_client_auth(),
    };

    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|e| tls_error(format!("invalid server name: {}", e)))?;
    Ok((TlsConnector::from(Arc::new(config)), server_name))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, String> {
    let file = File::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    if certs.is_empty() {
        return Err(format!("{}: no certificates found", path.display()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, String> {
    let file = File::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| format!("{}: {}", path.display(), e))?
        .ok_or_else(|| format!("{}: no private key found", path.display()))
}
