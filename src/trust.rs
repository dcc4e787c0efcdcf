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

//! Importing enrollment results into a trust database.

use std::collections::HashSet;

use der::Encode;
use sha2::{Digest, Sha256};
use x509_cert::Certificate;

use crate::capabilities::{TrustDatabase, TrustFlags};
use crate::config::ca_nickname;
use crate::error::{InstallError, Result};
use crate::types::{pem_encode, CaChain, IssuedCertificate};

/// Nickname of the RA agent certificate.
pub const RA_NICKNAME: &str = "ipaCert";

/// Nickname of the CA agent certificate created by the configuration wizard.
pub const CA_AGENT_NICKNAME: &str = "ipa-ca-agent";

/// Import the issued RA certificate under [`RA_NICKNAME`].
pub async fn import_issued_certificate(
    db: &dyn TrustDatabase,
    certificate: &IssuedCertificate,
) -> Result<()> {
    tracing::info!("Importing RA certificate as '{}'", RA_NICKNAME);
    db.import_certificate(certificate.as_base64().as_bytes(), RA_NICKNAME, TrustFlags::User)
        .await
}

/// Import every distinct certificate of the authority chain as a trusted CA.
///
/// The authority's own signing certificate (subject `ca_subject`) is
/// imported under the realm CA nickname; other certificates are named by
/// their subject DN. Returns the nicknames used, in import order.
pub async fn import_ca_chain(
    db: &dyn TrustDatabase,
    chain: &CaChain,
    ca_subject: &str,
    realm: &str,
) -> Result<Vec<String>> {
    if chain.is_empty() {
        return Err(InstallError::malformed_response(
            "Certificate chain contains no certificates",
        ));
    }

    let mut seen = HashSet::new();
    let mut nicknames = Vec::new();

    for cert in chain {
        let fp = compute_fingerprint(cert)?;
        if !seen.insert(fp) {
            tracing::debug!("Skipping duplicate chain certificate {}", format_fingerprint(&fp));
            continue;
        }

        let subject = subject_dn(cert);
        let nickname = chain_nickname(&subject, ca_subject, realm);
        let der = cert
            .to_der()
            .map_err(|e| InstallError::cms_parsing(format!("Failed to encode cert: {}", e)))?;

        tracing::debug!("Importing chain certificate '{}' ({})", nickname, subject);
        db.import_certificate(
            pem_encode("CERTIFICATE", &der).as_bytes(),
            &nickname,
            TrustFlags::CertificateAuthority,
        )
        .await?;
        nicknames.push(nickname);
    }

    Ok(nicknames)
}

/// Nickname for a chain certificate with the given subject.
pub fn chain_nickname(subject: &str, ca_subject: &str, realm: &str) -> String {
    if dn_matches(subject, ca_subject) {
        ca_nickname(realm)
    } else {
        subject.to_string()
    }
}

/// Subject DN of a certificate in RFC 4514 string form.
pub fn subject_dn(cert: &Certificate) -> String {
    cert.tbs_certificate.subject.to_string()
}

/// Compute the SHA-256 fingerprint of a certificate.
pub fn compute_fingerprint(cert: &Certificate) -> Result<[u8; 32]> {
    let der = cert
        .to_der()
        .map_err(|e| InstallError::cms_parsing(format!("Failed to encode cert: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&der);
    Ok(hasher.finalize().into())
}

/// Format a fingerprint as a colon-separated hex string.
pub fn format_fingerprint(fp: &[u8; 32]) -> String {
    fp.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Compare two DN strings, ignoring case, spacing and component order direction.
pub fn dn_matches(a: &str, b: &str) -> bool {
    let a = dn_components(a);
    let b = dn_components(b);
    if a.is_empty() || a.len() != b.len() {
        return false;
    }
    a == b || a.iter().eq(b.iter().rev())
}

fn dn_components(dn: &str) -> Vec<String> {
    dn.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((attr, value)) => format!(
                "{}={}",
                attr.trim().to_ascii_lowercase(),
                value.trim().to_lowercase()
            ),
            None => part.to_lowercase(),
        })
        .collect()
}
