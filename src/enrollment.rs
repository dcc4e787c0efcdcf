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

//! RA agent enrollment against the authority's web interfaces.
//!
//! One enrollment is four round-trips:
//! - submit the CSR to `profileSubmit` (end-entity interface)
//! - fetch the pending request from `profileReview` (agent interface)
//! - approve it through `profileProcess` (agent interface)
//! - read the issued certificate out of the approval response
//!
//! The authority chain is fetched separately from `getCertChain`.
//!
//! # Example
//!
//! ```no_run
//! use pki_ca_install::{AuthorityEndpoints, EnrollmentClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoints = AuthorityEndpoints::for_host("ipa.example.com")?;
//! let client = EnrollmentClient::new(endpoints, None)?;
//!
//! let chain = client.fetch_ca_chain().await?;
//! println!("Authority chain has {} certificates", chain.len());
//! # Ok(())
//! # }
//! ```

use std::sync::OnceLock;

use regex::Regex;
use reqwest::header::CONTENT_TYPE;

use crate::capabilities::TrustDatabase;
use crate::config::{AuthorityEndpoints, ClientIdentity};
use crate::error::{InstallError, Result};
use crate::parser::{find_value, parse_def_list, parse_output_list};
use crate::tls::build_http_client;
use crate::trust::import_issued_certificate;
use crate::types::{
    content_types, parse_certs_only, paths, strip_armor, CaChain, EnrollmentSession,
    IssuedCertificate, PendingRequest,
};

/// Certificate profile used for the RA agent certificate.
pub const RA_PROFILE: &str = "caServerCert";

/// Requestor name recorded on submitted requests.
pub const REQUESTOR_NAME: &str = "IPA Installer";

/// Key size of the RA agent key pair.
pub const RA_KEY_BITS: u32 = 2048;

/// Client for the enrollment round-trips.
#[derive(Debug)]
pub struct EnrollmentClient {
    endpoints: AuthorityEndpoints,
    ee: reqwest::Client,
    agent: reqwest::Client,
}

impl EnrollmentClient {
    /// Create a client.
    ///
    /// `agent_identity` authenticates review and approval on the agent
    /// interface; the end-entity interface is always anonymous.
    pub fn new(endpoints: AuthorityEndpoints, agent_identity: Option<&ClientIdentity>) -> Result<Self> {
        let ee = build_http_client(&endpoints, None)?;
        let agent = build_http_client(&endpoints, agent_identity)?;

        Ok(Self {
            endpoints,
            ee,
            agent,
        })
    }

    /// The endpoints this client talks to.
    pub fn endpoints(&self) -> &AuthorityEndpoints {
        &self.endpoints
    }

    /// Submit a PKCS#10 request and return the request id.
    ///
    /// `csr` may be PEM, tool output wrapping PEM, or bare base64; only the
    /// base64 body is sent.
    pub async fn submit(&self, csr: &str) -> Result<String> {
        let url = self.endpoints.build_ee_url(paths::PROFILE_SUBMIT);
        tracing::debug!("POST {}", url);

        let csr = strip_armor(csr);

        let form = [
            ("profileId", RA_PROFILE),
            ("cert_request_type", "pkcs10"),
            ("requestor_name", REQUESTOR_NAME),
            ("cert_request", csr.as_str()),
            ("xmlOutput", "true"),
        ];

        let response = self
            .ee
            .post(url)
            .header(CONTENT_TYPE, content_types::FORM)
            .form(&form)
            .send()
            .await?;

        let response = handle_error_response(response).await?;
        let body = response.text().await?;

        match xml_element(&body, XmlElement::RequestId) {
            Some(id) => {
                tracing::info!("Authority accepted request {}", id);
                Ok(id)
            }
            None => {
                let reason = xml_element(&body, XmlElement::Error)
                    .unwrap_or_else(|| "no RequestId in submission response".to_string());
                Err(InstallError::malformed_response(reason))
            }
        }
    }

    /// Fetch the review page of a pending request.
    pub async fn fetch_pending(&self, request_id: &str) -> Result<PendingRequest> {
        let url = self.endpoints.build_agent_url(paths::PROFILE_REVIEW);
        tracing::debug!("GET {}?requestId={}", url, request_id);

        let response = self
            .agent
            .get(url)
            .query(&[("requestId", request_id)])
            .send()
            .await?;

        let response = handle_error_response(response).await?;
        let body = response.text().await?;

        let reviewed_id = find_value(&body, "requestId").ok_or_else(|| {
            InstallError::malformed_response("no requestId in review response")
        })?;
        if reviewed_id != request_id {
            return Err(InstallError::malformed_response(format!(
                "review response is for request {}, expected {}",
                reviewed_id, request_id
            )));
        }

        let fields = parse_def_list(&body);
        tracing::debug!("Request {} has {} editable fields", request_id, fields.len());

        Ok(PendingRequest {
            request_id: reviewed_id,
            fields,
        })
    }

    /// Approve a pending request and return the issued certificate.
    pub async fn approve(&self, pending: &PendingRequest) -> Result<IssuedCertificate> {
        let url = self.endpoints.build_agent_url(paths::PROFILE_PROCESS);
        tracing::debug!("POST {}", url);

        let response = self
            .agent
            .post(url)
            .header(CONTENT_TYPE, content_types::FORM)
            .form(&pending.approval_form())
            .send()
            .await?;

        let response = handle_error_response(response).await?;
        let body = response.text().await?;

        let outputs = parse_output_list(&body);
        let b64_cert = outputs.get("b64_cert").ok_or_else(|| {
            InstallError::malformed_response(format!(
                "no b64_cert in approval response for request {}",
                pending.request_id
            ))
        })?;

        Ok(IssuedCertificate::from_output(b64_cert))
    }

    /// Fetch the authority certificate chain.
    pub async fn fetch_ca_chain(&self) -> Result<CaChain> {
        let url = self.endpoints.build_ee_url(paths::GET_CERT_CHAIN);
        tracing::debug!("GET {}", url);

        let response = self.ee.get(url).send().await?;

        let response = handle_error_response(response).await?;
        let body = response.text().await?;

        let chain = xml_element(&body, XmlElement::ChainBase64)
            .ok_or_else(|| InstallError::malformed_response("no ChainBase64 in chain response"))?;

        Ok(CaChain::new(parse_certs_only(chain.as_bytes())?))
    }

    /// Generate the RA key pair in `db` and submit its CSR.
    pub async fn request_certificate(
        &self,
        db: &dyn TrustDatabase,
        subject: &str,
    ) -> Result<EnrollmentSession> {
        let csr = db.generate_key_pair_and_csr(subject, RA_KEY_BITS).await?;
        let mut session = EnrollmentSession::new(&csr);
        session.request_id = Some(self.submit(&session.csr).await?);
        Ok(session)
    }

    /// Review, approve and import the certificate of a submitted session.
    pub async fn issue_certificate(
        &self,
        session: &mut EnrollmentSession,
        db: &dyn TrustDatabase,
    ) -> Result<()> {
        let request_id = session.require_request_id()?.to_string();

        let pending = self.fetch_pending(&request_id).await?;
        let certificate = self.approve(&pending).await?;

        import_issued_certificate(db, &certificate).await?;
        session.issued_certificate = Some(certificate);

        Ok(())
    }

    /// Run a whole enrollment for `subject`.
    pub async fn enroll(&self, db: &dyn TrustDatabase, subject: &str) -> Result<EnrollmentSession> {
        let mut session = self.request_certificate(db, subject).await?;
        self.issue_certificate(&mut session, db).await?;
        Ok(session)
    }
}

/// Convert a non-success response into an error.
async fn handle_error_response(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    Err(InstallError::submission_rejected(status.as_u16(), message))
}

/// Elements read from the authority's XML responses.
#[derive(Debug, Clone, Copy)]
enum XmlElement {
    RequestId,
    Error,
    ChainBase64,
}

impl XmlElement {
    fn name(self) -> &'static str {
        match self {
            Self::RequestId => "RequestId",
            Self::Error => "Error",
            Self::ChainBase64 => "ChainBase64",
        }
    }

    /// Compiled once per element.
    fn pattern(self) -> Option<&'static Regex> {
        static REQUEST_ID: OnceLock<Option<Regex>> = OnceLock::new();
        static ERROR: OnceLock<Option<Regex>> = OnceLock::new();
        static CHAIN_BASE64: OnceLock<Option<Regex>> = OnceLock::new();

        let cell = match self {
            Self::RequestId => &REQUEST_ID,
            Self::Error => &ERROR,
            Self::ChainBase64 => &CHAIN_BASE64,
        };
        cell.get_or_init(|| Regex::new(&format!(r"(?s)<{0}>(.*?)</{0}>", self.name())).ok())
            .as_ref()
    }
}

/// Trimmed text of the first `element` in an XML body.
fn xml_element(body: &str, element: XmlElement) -> Option<String> {
    element
        .pattern()?
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}
