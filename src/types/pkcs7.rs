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

//! PKCS#7 parsing for the authority's certificate chain.
//!
//! `getCertChain` returns a base64 "certs-only" SignedData that may hold
//! several certificates; each is imported separately.

use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::{Decode, Encode};
use x509_cert::Certificate;

use super::decode_base64;
use crate::error::{InstallError, Result};

/// Certificates of the authority chain, in the order the authority sent them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaChain {
    /// The chain certificates.
    pub certificates: Vec<Certificate>,
}

impl CaChain {
    /// Create a chain.
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self { certificates }
    }

    /// Returns true if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Iterate over the certificates.
    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates.iter()
    }
}

impl<'a> IntoIterator for &'a CaChain {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certificates.iter()
    }
}

/// Parse a base64-encoded PKCS#7 certs-only structure.
pub fn parse_certs_only(body: &[u8]) -> Result<Vec<Certificate>> {
    let der_bytes = decode_base64(body)?;

    let content_info = ContentInfo::from_der(&der_bytes)
        .map_err(|e| InstallError::cms_parsing(format!("Failed to parse ContentInfo: {}", e)))?;

    let signed_data = extract_signed_data(&content_info)?;

    extract_certificates(&signed_data)
}

/// Extract SignedData from ContentInfo.
fn extract_signed_data(content_info: &ContentInfo) -> Result<SignedData> {
    if content_info.content_type != const_oid::db::rfc5911::ID_SIGNED_DATA {
        return Err(InstallError::cms_parsing(format!(
            "Expected SignedData OID, got {}",
            content_info.content_type
        )));
    }

    let content = content_info
        .content
        .to_der()
        .map_err(|e| InstallError::cms_parsing(format!("Failed to encode content: {}", e)))?;

    SignedData::from_der(&content)
        .map_err(|e| InstallError::cms_parsing(format!("Failed to parse SignedData: {}", e)))
}

/// Extract certificates from SignedData.
fn extract_certificates(signed_data: &SignedData) -> Result<Vec<Certificate>> {
    let cert_set = match &signed_data.certificates {
        Some(certs) => certs,
        None => return Ok(Vec::new()),
    };

    let mut certificates = Vec::new();

    for cert_choice in cert_set.0.iter() {
        let cert_der = cert_choice
            .to_der()
            .map_err(|e| InstallError::cms_parsing(format!("Failed to encode certificate: {}", e)))?;

        match Certificate::from_der(&cert_der) {
            Ok(cert) => certificates.push(cert),
            Err(e) => {
                tracing::warn!("Skipping non-X.509 certificate: {}", e);
            }
        }
    }

    Ok(certificates)
}
