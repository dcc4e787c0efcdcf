// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! TLS configuration helpers for talking to the authority.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::config::{AuthorityEndpoints, ClientIdentity, TrustAnchors};
use crate::error::{InstallError, Result};
use crate::types::pem_encode;

/// Build a reqwest Client for the authority's interfaces.
///
/// The agent interface requires a client certificate; the end-entity
/// interface does not, so `identity` is optional.
pub fn build_http_client(
    endpoints: &AuthorityEndpoints,
    identity: Option<&ClientIdentity>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(endpoints.timeout)
        .user_agent(crate::USER_AGENT)
        .use_rustls_tls();

    match &endpoints.trust_anchors {
        TrustAnchors::WebPki => {
            builder = builder.tls_built_in_root_certs(true);
        }
        TrustAnchors::Explicit(ca_certs) => {
            builder = builder.tls_built_in_root_certs(false);
            for ca_pem in ca_certs {
                let cert = reqwest::Certificate::from_pem(ca_pem)
                    .map_err(|e| InstallError::tls(format!("Failed to parse CA certificate: {}", e)))?;
                builder = builder.add_root_certificate(cert);
            }
        }
        TrustAnchors::InsecureAcceptAny => {
            builder = builder
                .tls_built_in_root_certs(false)
                .danger_accept_invalid_certs(true);
        }
    }

    if let Some(identity) = identity {
        builder = builder.identity(build_reqwest_identity(identity)?);
    }

    builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_2);

    builder
        .build()
        .map_err(|e| InstallError::tls(format!("Failed to build HTTP client: {}", e)))
}

/// Build a reqwest Identity from PEM-encoded certificate and key.
fn build_reqwest_identity(identity: &ClientIdentity) -> Result<reqwest::Identity> {
    // Validate both halves first for a clearer error than reqwest gives.
    parse_pem_certificates(&identity.cert_pem)?;
    parse_pem_private_key(&identity.key_pem)?;

    let mut pem_data = identity.cert_pem.clone();
    pem_data.extend_from_slice(b"\n");
    pem_data.extend_from_slice(&identity.key_pem);

    reqwest::Identity::from_pem(&pem_data)
        .map_err(|e| InstallError::tls(format!("Failed to create client identity: {}", e)))
}

/// Parse PEM-encoded certificates.
pub fn parse_pem_certificates(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem_data);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .filter_map(|result| result.ok())
        .collect();

    if certs.is_empty() {
        return Err(InstallError::invalid_pem("No certificates found in PEM data"));
    }

    Ok(certs)
}

/// Parse a PEM-encoded private key.
pub fn parse_pem_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(pem_data);

    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(key)) => Ok(key),
        Ok(None) => Err(InstallError::invalid_pem("No private key found in PEM data")),
        Err(e) => Err(InstallError::invalid_pem(format!("Failed to parse PEM: {}", e))),
    }
}

/// Split a PEM bundle (as printed by `openssl pkcs12 -nodes`) into its
/// certificates and its private key.
///
/// Bag attributes and other text between blocks are dropped.
pub fn split_pem_bundle(bundle: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut reader = std::io::BufReader::new(bundle);
    let mut certs = String::new();
    let mut key = String::new();

    for item in rustls_pemfile::read_all(&mut reader) {
        let item =
            item.map_err(|e| InstallError::invalid_pem(format!("Failed to parse PEM: {}", e)))?;
        match item {
            rustls_pemfile::Item::X509Certificate(cert) => {
                certs.push_str(&pem_encode("CERTIFICATE", cert.as_ref()));
            }
            rustls_pemfile::Item::Pkcs8Key(k) if key.is_empty() => {
                key = pem_encode("PRIVATE KEY", k.secret_pkcs8_der());
            }
            rustls_pemfile::Item::Pkcs1Key(k) if key.is_empty() => {
                key = pem_encode("RSA PRIVATE KEY", k.secret_pkcs1_der());
            }
            rustls_pemfile::Item::Sec1Key(k) if key.is_empty() => {
                key = pem_encode("EC PRIVATE KEY", k.secret_sec1_der());
            }
            _ => {}
        }
    }

    if certs.is_empty() {
        return Err(InstallError::invalid_pem("No certificates found in PEM bundle"));
    }
    if key.is_empty() {
        return Err(InstallError::invalid_pem("No private key found in PEM bundle"));
    }

    Ok((certs.into_bytes(), key.into_bytes()))
}
