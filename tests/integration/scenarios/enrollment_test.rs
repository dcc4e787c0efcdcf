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

//! Integration tests for the RA enrollment round-trips

use crate::integration::{
    fixtures, MockAuthority, RecordingTrustDatabase, PATH_PROCESS, PATH_REVIEW, PATH_SUBMIT,
};
use pki_ca_install::capabilities::TrustFlags;
use pki_ca_install::{EnrollmentClient, ErrorKind};

fn form(body: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

fn field<'a>(form: &'a [(String, String)], name: &str) -> Option<&'a str> {
    form.iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

#[tokio::test]
async fn test_successful_enrollment() {
    // Start mock authority
    let mock = MockAuthority::start().await;

    let (ca, ca_key) = fixtures::ca_certificate("EXAMPLE.COM");
    let (ra, _) = fixtures::issued_certificate("IPA RA", &ca, &ca_key);
    let b64_cert = fixtures::base64_der(&ra);

    mock.mock_submit("1001").await;
    mock.mock_review("1001", &fixtures::review_page("1001")).await;
    mock.mock_approve(&b64_cert).await;

    let client = EnrollmentClient::new(mock.endpoints(), Some(&fixtures::agent_identity()))
        .expect("Client creation failed");
    let db = RecordingTrustDatabase::new();

    // Test: full enrollment
    let result = client.enroll(&db, "CN=IPA RA,O=EXAMPLE.COM").await;
    assert!(result.is_ok(), "enroll failed: {:?}", result.err());

    let session = result.unwrap();
    assert_eq!(session.request_id.as_deref(), Some("1001"));
    assert_eq!(
        session.issued_certificate.as_ref().map(|c| c.as_base64()),
        Some(b64_cert.as_str())
    );

    // Assert: one round-trip per endpoint
    assert_eq!(mock.requests_to(PATH_SUBMIT).await.len(), 1);
    assert_eq!(mock.requests_to(PATH_REVIEW).await.len(), 1);
    assert_eq!(mock.requests_to(PATH_PROCESS).await.len(), 1);

    // Assert: certificate imported as the RA user certificate
    assert_eq!(
        db.imports(),
        vec![("ipaCert".to_string(), b64_cert.clone(), TrustFlags::User)]
    );
    assert!(db.calls()[0].starts_with("generate_key_pair_and_csr CN=IPA RA,O=EXAMPLE.COM 2048"));
}

#[tokio::test]
async fn test_canned_enrollment_round_trips_in_order() {
    let mock = MockAuthority::start().await;
    mock.mock_submit("1001").await;
    mock.mock_review("1001", &fixtures::review_page("1001")).await;
    mock.mock_approve("TEST==").await;

    let client = EnrollmentClient::new(mock.endpoints(), None).unwrap();
    let db = RecordingTrustDatabase::new();

    let session = client.enroll(&db, "CN=IPA RA,O=EXAMPLE.COM").await.unwrap();

    assert_eq!(session.request_id.as_deref(), Some("1001"));
    assert_eq!(
        session.issued_certificate.as_ref().map(|c| c.as_base64()),
        Some("TEST==")
    );
    assert_eq!(
        mock.received_paths().await,
        vec![PATH_SUBMIT, PATH_REVIEW, PATH_PROCESS]
    );
    assert_eq!(
        db.imports(),
        vec![("ipaCert".to_string(), "TEST==".to_string(), TrustFlags::User)]
    );
}

#[tokio::test]
async fn test_submission_form() {
    let mock = MockAuthority::start().await;
    mock.mock_submit("7").await;

    let client = EnrollmentClient::new(mock.endpoints(), None).unwrap();
    let id = client.submit(fixtures::CSR_PEM).await.expect("submit failed");
    assert_eq!(id, "7");

    let requests = mock.requests_to(PATH_SUBMIT).await;
    let submitted = form(&requests[0].body);
    assert_eq!(field(&submitted, "profileId"), Some("caServerCert"));
    assert_eq!(field(&submitted, "cert_request_type"), Some("pkcs10"));
    assert_eq!(field(&submitted, "requestor_name"), Some("IPA Installer"));
    assert_eq!(field(&submitted, "xmlOutput"), Some("true"));

    // The CSR is sent without PEM armor
    let csr = field(&submitted, "cert_request").unwrap();
    assert!(!csr.contains("-----"));
    assert!(csr.starts_with("MIIB"));
}

#[tokio::test]
async fn test_submission_sends_only_the_request_body() {
    let mock = MockAuthority::start().await;
    mock.mock_submit("8").await;

    let certutil_output = format!(
        "Certificate request generated by Netscape certutil\n\
         Phone: (not specified)\n\
         \n\
         Common Name: IPA RA\n\
         Organization: EXAMPLE.COM\n\
         \n{}",
        fixtures::CSR_PEM
    );

    let client = EnrollmentClient::new(mock.endpoints(), None).unwrap();
    client.submit(&certutil_output).await.expect("submit failed");

    let requests = mock.requests_to(PATH_SUBMIT).await;
    let submitted = form(&requests[0].body);
    assert_eq!(
        field(&submitted, "cert_request"),
        Some("MIIBWTCBwwIBADAaMRgwFgYDVQQDEw9JUEEgUkEgRVhBTVBMRQ==")
    );
}

#[tokio::test]
async fn test_approval_echoes_editable_fields() {
    let mock = MockAuthority::start().await;
    mock.mock_review("1001", &fixtures::review_page("1001")).await;
    mock.mock_approve("TUlJQg==").await;

    let client = EnrollmentClient::new(mock.endpoints(), None).unwrap();
    let pending = client.fetch_pending("1001").await.expect("review failed");
    assert_eq!(pending.fields.names(), vec!["sn_uid", "notAfter"]);

    let issued = client.approve(&pending).await.expect("approve failed");
    assert_eq!(issued.as_base64(), "TUlJQg==");

    let requests = mock.requests_to(PATH_PROCESS).await;
    let approved = form(&requests[0].body);
    assert_eq!(field(&approved, "requestId"), Some("1001"));
    assert_eq!(field(&approved, "op"), Some("approve"));
    assert_eq!(field(&approved, "submit"), Some("submit"));
    assert_eq!(field(&approved, "sn_uid"), Some("ipara"));
    assert_eq!(field(&approved, "notAfter"), Some("2028-10-19 00:00:00"));

    // Readonly fields are not sent back
    assert_eq!(field(&approved, "keyAlgorithm"), None);
}

#[tokio::test]
async fn test_submission_rejected() {
    let mock = MockAuthority::start().await;
    mock.mock_submit_response(500, "Internal Server Error").await;

    let client = EnrollmentClient::new(mock.endpoints(), None).unwrap();
    let db = RecordingTrustDatabase::new();

    let err = client
        .enroll(&db, "CN=IPA RA,O=EXAMPLE.COM")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SubmissionRejected);
    assert!(err.to_string().contains("500"));

    // Nothing past the submission was attempted
    assert!(mock.requests_to(PATH_REVIEW).await.is_empty());
    assert!(db.imports().is_empty());
}

#[tokio::test]
async fn test_submission_without_request_id() {
    let mock = MockAuthority::start().await;
    mock.mock_submit_response(
        200,
        "<XMLResponse><Status>1</Status><Error>Profile caServerCert not found</Error></XMLResponse>",
    )
    .await;

    let client = EnrollmentClient::new(mock.endpoints(), None).unwrap();
    let err = client.submit(fixtures::CSR_PEM).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    assert!(err.to_string().contains("Profile caServerCert not found"));
}

#[tokio::test]
async fn test_review_of_other_request() {
    let mock = MockAuthority::start().await;
    mock.mock_review("1001", &fixtures::review_page("2002")).await;

    let client = EnrollmentClient::new(mock.endpoints(), None).unwrap();
    let err = client.fetch_pending("1001").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    assert!(err.to_string().contains("2002"));
}

#[tokio::test]
async fn test_approval_without_certificate() {
    let mock = MockAuthority::start().await;
    mock.mock_review("1001", &fixtures::review_page("1001")).await;
    mock.mock_approve_page("<html><script>\nvar errorCode = \"1\";\n</script></html>")
        .await;

    let client = EnrollmentClient::new(mock.endpoints(), None).unwrap();
    let pending = client.fetch_pending("1001").await.unwrap();
    let err = client.approve(&pending).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    assert!(err.to_string().contains("b64_cert"));
}

#[tokio::test]
async fn test_fetch_ca_chain() {
    let mock = MockAuthority::start().await;

    let (root, root_key) = fixtures::ca_certificate("EXAMPLE.COM");
    let (sub, _) = fixtures::issued_certificate("Sub CA", &root, &root_key);
    mock.mock_cert_chain(&fixtures::certs_only_base64(&[&root, &sub]))
        .await;

    let client = EnrollmentClient::new(mock.endpoints(), None).unwrap();
    let chain = client.fetch_ca_chain().await.expect("chain fetch failed");

    assert_eq!(chain.len(), 2);
}
