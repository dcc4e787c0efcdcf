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

//! Enrollment message types and encoding helpers.
//!
//! This module provides the state carried through one RA enrollment, the
//! request details returned by the authority's review page, and the
//! PKCS#7 chain parsing used for the authority's certificate chain.

mod pkcs7;

pub use pkcs7::{parse_certs_only, CaChain};

use base64::prelude::*;

use crate::error::{InstallError, Result};
use crate::parser::ResponseDocument;

/// State of one enrollment, threaded through the enrollment steps.
///
/// Created when the CSR is generated, filled in as the request is
/// submitted and approved, and dropped once the results are imported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrollmentSession {
    /// Request id assigned by the authority on submission.
    pub request_id: Option<String>,

    /// PKCS#10 request, base64 without armor.
    pub csr: String,

    /// Issued certificate after approval.
    pub issued_certificate: Option<IssuedCertificate>,

    /// Authority chain fetched alongside the certificate.
    pub issued_chain: Option<CaChain>,
}

impl EnrollmentSession {
    /// Start a session for a CSR (PEM or bare base64).
    pub fn new(csr: &str) -> Self {
        Self {
            csr: strip_armor(csr),
            ..Default::default()
        }
    }

    /// The request id, or an error if the request was never submitted.
    pub fn require_request_id(&self) -> Result<&str> {
        self.request_id
            .as_deref()
            .ok_or_else(|| InstallError::precondition_missing("RA certificate request was not submitted"))
    }

    /// The issued certificate, or an error if the request was never approved.
    pub fn require_certificate(&self) -> Result<&IssuedCertificate> {
        self.issued_certificate
            .as_ref()
            .ok_or_else(|| InstallError::precondition_missing("RA certificate was not issued"))
    }
}

/// A pending request as shown on the agent review page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Request id re-extracted from the review page.
    pub request_id: String,

    /// Editable request fields.
    pub fields: ResponseDocument,
}

impl PendingRequest {
    /// Form fields that approve this request unchanged.
    pub fn approval_form(&self) -> Vec<(String, String)> {
        let mut form = self.fields.clone();
        form.insert("requestId", self.request_id.clone());
        form.insert("op", "approve");
        form.insert("submit", "submit");
        form.insert("requestNotes", "");
        form.into_pairs()
    }
}

/// A certificate returned by the authority, base64 without armor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    base64: String,
}

impl IssuedCertificate {
    /// Wrap a `b64_cert` value, stripping armor and escaped newlines.
    pub fn from_output(b64_cert: &str) -> Self {
        Self {
            base64: strip_armor(b64_cert),
        }
    }

    /// Base64 text of the certificate.
    pub fn as_base64(&self) -> &str {
        &self.base64
    }

    /// Decoded DER bytes.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        decode_base64(self.base64.as_bytes())
    }
}

/// Content types used with the authority.
pub mod content_types {
    /// HTML form submission.
    pub const FORM: &str = "application/x-www-form-urlencoded";
}

/// Authority servlet paths, relative to the interface prefix.
pub mod paths {
    /// Profile-based enrollment (end-entity interface).
    pub const PROFILE_SUBMIT: &str = "profileSubmit";

    /// Request review (agent interface).
    pub const PROFILE_REVIEW: &str = "profileReview";

    /// Request approval (agent interface).
    pub const PROFILE_PROCESS: &str = "profileProcess";

    /// Authority certificate chain (end-entity interface).
    pub const GET_CERT_CHAIN: &str = "getCertChain";
}

/// Remove PEM armor, literal `\n` escapes and whitespace from base64 text.
///
/// When a `-----BEGIN` marker is present only the body between it and the
/// matching `-----END` line is kept, so tool preambles such as the one
/// `certutil -R -a` prints are dropped.
pub fn strip_armor(text: &str) -> String {
    let text = text.replace("\\n", "\n").replace("\\r", "\r");
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    let body: &[&str] = match lines.iter().position(|line| line.starts_with("-----BEGIN")) {
        Some(begin) => {
            let rest = &lines[begin + 1..];
            let end = rest
                .iter()
                .position(|line| line.starts_with("-----END"))
                .unwrap_or(rest.len());
            &rest[..end]
        }
        None => &lines,
    };

    body.iter()
        .filter(|line| !line.starts_with("-----"))
        .flat_map(|line| line.chars().filter(|c| !c.is_whitespace()))
        .collect()
}

/// Wrap DER bytes in PEM armor with 64-column lines.
pub fn pem_encode(label: &str, der: &[u8]) -> String {
    let encoded = BASE64_STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {}-----\n", label);
    for chunk in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}

/// Decode base64 data, ignoring whitespace.
pub(crate) fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    BASE64_STANDARD.decode(&cleaned).map_err(InstallError::Base64)
}
