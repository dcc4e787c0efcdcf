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

//! Integration test utilities and helpers
//!
//! This module provides the common test infrastructure for the installer
//! integration tests: a mock authority, an in-memory host, and recording
//! trust and directory fakes.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pki_ca_install::capabilities::{
    DirectoryService, LdapEntry, LdapModification, ServiceAction, SystemCapabilities,
    ToolCommand, ToolOutput, TrustDatabase, TrustFlags,
};
use pki_ca_install::{AuthorityEndpoints, ClientIdentity, InstallError, InstallationRequest, Result};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Authority servlet paths
pub const PATH_SUBMIT: &str = "/ca/ee/ca/profileSubmit";
pub const PATH_REVIEW: &str = "/ca/agent/ca/profileReview";
pub const PATH_PROCESS: &str = "/ca/agent/ca/profileProcess";
pub const PATH_CHAIN: &str = "/ca/ee/ca/getCertChain";

/// Mock authority web interfaces for integration tests
pub struct MockAuthority {
    server: MockServer,
}

impl MockAuthority {
    /// Start a new mock authority
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Base URL of the mock authority
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Get a reference to the inner MockServer for custom mocking
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Both interfaces served from the mock
    pub fn endpoints(&self) -> AuthorityEndpoints {
        AuthorityEndpoints::new(self.url(), self.url())
            .expect("Valid URL")
            .with_timeout(Duration::from_secs(5))
    }

    /// Mock an accepted submission
    pub async fn mock_submit(&self, request_id: &str) {
        self.mock_submit_response(200, &fixtures::submit_response(request_id))
            .await;
    }

    /// Mock an arbitrary submission response
    pub async fn mock_submit_response(&self, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path(PATH_SUBMIT))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_string(body)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&self.server)
            .await;
    }

    /// Mock the review page of a pending request
    pub async fn mock_review(&self, request_id: &str, page: &str) {
        Mock::given(method("GET"))
            .and(path(PATH_REVIEW))
            .and(query_param("requestId", request_id))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(page)
                    .insert_header("Content-Type", "text/html"),
            )
            .mount(&self.server)
            .await;
    }

    /// Mock an approval issuing `b64_cert`
    pub async fn mock_approve(&self, b64_cert: &str) {
        self.mock_approve_page(&fixtures::approval_page(b64_cert)).await;
    }

    /// Mock an arbitrary approval page
    pub async fn mock_approve_page(&self, page: &str) {
        Mock::given(method("POST"))
            .and(path(PATH_PROCESS))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(page)
                    .insert_header("Content-Type", "text/html"),
            )
            .mount(&self.server)
            .await;
    }

    /// Mock the authority chain
    pub async fn mock_cert_chain(&self, pkcs7_base64: &str) {
        Mock::given(method("GET"))
            .and(path(PATH_CHAIN))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(fixtures::chain_response(pkcs7_base64))
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&self.server)
            .await;
    }

    /// Requests received on `request_path`
    pub async fn requests_to(&self, request_path: &str) -> Vec<wiremock::Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == request_path)
            .collect()
    }

    /// Paths of every request received, in arrival order
    pub async fn received_paths(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.url.path().to_string())
            .collect()
    }
}

/// In-memory host: files, accounts, services and a command log.
#[derive(Default)]
pub struct FakeSystem {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    dirs: Mutex<BTreeSet<PathBuf>>,
    modes: Mutex<BTreeMap<PathBuf, u32>>,
    commands: Mutex<Vec<ToolCommand>>,
    services: Mutex<Vec<(String, ServiceAction)>>,
    users: Mutex<BTreeSet<String>>,
    enabled: Mutex<BTreeMap<String, bool>>,
    running: Mutex<BTreeSet<String>>,
    failing: Mutex<BTreeMap<String, String>>,
    on_run: Mutex<Vec<(String, PathBuf, Vec<u8>)>>,
    closed_ports: Mutex<BTreeSet<u16>>,
}

impl FakeSystem {
    /// An empty host
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file
    pub fn with_file(self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Self {
        self.put(path.as_ref(), contents.as_ref());
        self
    }

    /// Add a system account
    pub fn with_user(self, user: &str) -> Self {
        self.users.lock().unwrap().insert(user.to_string());
        self
    }

    /// Mark a service as starting on boot
    pub fn with_enabled(self, service: &str, enabled: bool) -> Self {
        self.enabled
            .lock()
            .unwrap()
            .insert(service.to_string(), enabled);
        self
    }

    /// Make every checked run of `program` fail with `stderr`
    pub fn with_failing(self, program: &str, stderr: &str) -> Self {
        self.failing
            .lock()
            .unwrap()
            .insert(program.to_string(), stderr.to_string());
        self
    }

    /// Make waiting for `port` time out
    pub fn with_closed_port(self, port: u16) -> Self {
        self.closed_ports.lock().unwrap().insert(port);
        self
    }

    /// Create `path` when `program` runs
    pub fn creates_on_run(
        self,
        program: &str,
        path: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
    ) -> Self {
        self.on_run.lock().unwrap().push((
            program.to_string(),
            path.as_ref().to_path_buf(),
            contents.as_ref().to_vec(),
        ));
        self
    }

    /// Commands run so far, secrets masked
    pub fn command_lines(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Returns true if a command whose line contains `needle` ran
    pub fn ran(&self, needle: &str) -> bool {
        self.command_lines().iter().any(|line| line.contains(needle))
    }

    /// Service calls so far
    pub fn service_calls(&self) -> Vec<(String, ServiceAction)> {
        self.services.lock().unwrap().clone()
    }

    /// Contents of a file
    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(path.as_ref())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Permission bits last set on a path
    pub fn mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.modes.lock().unwrap().get(path.as_ref()).copied()
    }

    fn put(&self, path: &Path, contents: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_vec());
    }

    fn not_found(path: &Path) -> InstallError {
        InstallError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        ))
    }
}

fn matches_program(command: &ToolCommand, program: &str) -> bool {
    command.program().ends_with(program)
        || command
            .arguments()
            .first()
            .is_some_and(|arg| arg.ends_with(program))
}

#[async_trait]
impl SystemCapabilities for FakeSystem {
    async fn run(&self, command: ToolCommand) -> Result<ToolOutput> {
        self.commands.lock().unwrap().push(command.clone());

        for (program, path, contents) in self.on_run.lock().unwrap().iter() {
            if matches_program(&command, program) {
                self.put(path, contents);
            }
        }

        let failure = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .find(|(program, _)| matches_program(&command, program))
            .map(|(_, stderr)| stderr.clone());

        match failure {
            Some(stderr) if command.is_checked() => Err(InstallError::external_tool(
                command.program(),
                format!("exit status 1: {}", stderr),
            )),
            Some(stderr) => Ok(ToolOutput {
                status: 1,
                stdout: String::new(),
                stderr,
            }),
            None => Ok(ToolOutput::default()),
        }
    }

    async fn read_to_string(&self, path: &Path) -> Result<String> {
        self.file(path).ok_or_else(|| Self::not_found(path))
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.put(path, contents);
        Ok(())
    }

    async fn path_exists(&self, path: &Path) -> bool {
        self.dirs.lock().unwrap().contains(path)
            || self
                .files
                .lock()
                .unwrap()
                .keys()
                .any(|file| file.starts_with(path))
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        let contents = self
            .files
            .lock()
            .unwrap()
            .get(from)
            .cloned()
            .ok_or_else(|| Self::not_found(from))?;
        self.put(to, &contents);
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let contents = self
            .files
            .lock()
            .unwrap()
            .remove(from)
            .ok_or_else(|| Self::not_found(from))?;
        self.put(to, &contents);
        Ok(())
    }

    async fn create_dir(&self, path: &Path) -> Result<()> {
        self.dirs.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(path))
    }

    async fn set_permissions(&self, path: &Path, mode: u32) -> Result<()> {
        self.modes.lock().unwrap().insert(path.to_path_buf(), mode);
        Ok(())
    }

    async fn set_owner(&self, _path: &Path, _user: Option<&str>, _group: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn user_exists(&self, user: &str) -> Result<bool> {
        Ok(self.users.lock().unwrap().contains(user))
    }

    async fn restore_context(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    async fn service(&self, name: &str, action: ServiceAction) -> Result<()> {
        self.services
            .lock()
            .unwrap()
            .push((name.to_string(), action));

        let mut running = self.running.lock().unwrap();
        match action {
            ServiceAction::Start | ServiceAction::Restart => {
                running.insert(name.to_string());
            }
            ServiceAction::Stop => {
                running.remove(name);
            }
            ServiceAction::Disable => {
                self.enabled
                    .lock()
                    .unwrap()
                    .insert(name.to_string(), false);
            }
        }
        Ok(())
    }

    async fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self
            .enabled
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(false))
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        Ok(self.running.lock().unwrap().contains(name))
    }

    async fn wait_for_port(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        if self.closed_ports.lock().unwrap().contains(&port) {
            return Err(InstallError::external_tool(
                "wait_for_port",
                format!("{}:{} not open after {} seconds", host, port, timeout.as_secs()),
            ));
        }
        Ok(())
    }
}

/// Certificate database that records what it is asked to do.
#[derive(Default)]
pub struct RecordingTrustDatabase {
    imports: Mutex<Vec<(String, String, TrustFlags)>>,
    trust_changes: Mutex<Vec<(String, TrustFlags)>>,
    calls: Mutex<Vec<String>>,
    identity: Option<ClientIdentity>,
    chain_nicknames: Vec<String>,
    server_certs: Vec<(String, Vec<u8>)>,
}

impl RecordingTrustDatabase {
    /// An empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity returned by `export_client_identity`
    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Issuer nicknames returned by `list_chain_nicknames`
    pub fn with_chain_nicknames(mut self, nicknames: &[&str]) -> Self {
        self.chain_nicknames = nicknames.iter().map(|n| n.to_string()).collect();
        self
    }

    /// A certificate with a private key
    pub fn with_server_certificate(mut self, nickname: &str, pem: &str) -> Self {
        self.server_certs
            .push((nickname.to_string(), pem.as_bytes().to_vec()));
        self
    }

    /// Imported certificates as `(nickname, text, trust)`
    pub fn imports(&self) -> Vec<(String, String, TrustFlags)> {
        self.imports.lock().unwrap().clone()
    }

    /// Nicknames of imported certificates, in order
    pub fn imported_nicknames(&self) -> Vec<String> {
        self.imports()
            .into_iter()
            .map(|(nickname, _, _)| nickname)
            .collect()
    }

    /// Trust changes as `(nickname, trust)`
    pub fn trust_changes(&self) -> Vec<(String, TrustFlags)> {
        self.trust_changes.lock().unwrap().clone()
    }

    /// Names of the operations called, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl TrustDatabase for RecordingTrustDatabase {
    async fn create_database(&self) -> Result<()> {
        self.record("create_database");
        Ok(())
    }

    async fn generate_key_pair_and_csr(&self, subject_dn: &str, key_bits: u32) -> Result<String> {
        self.record(&format!("generate_key_pair_and_csr {} {}", subject_dn, key_bits));
        Ok(fixtures::CSR_PEM.to_string())
    }

    async fn import_certificate(&self, cert: &[u8], nickname: &str, trust: TrustFlags) -> Result<()> {
        self.record("import_certificate");
        self.imports.lock().unwrap().push((
            nickname.to_string(),
            String::from_utf8_lossy(cert).into_owned(),
            trust,
        ));
        Ok(())
    }

    async fn export_certificate(&self, nickname: &str) -> Result<Vec<u8>> {
        self.record("export_certificate");
        self.imports()
            .into_iter()
            .find(|(n, _, _)| n == nickname)
            .map(|(_, text, _)| text.into_bytes())
            .ok_or_else(|| InstallError::precondition_missing(format!("no certificate {}", nickname)))
    }

    async fn find_server_certificates(&self) -> Result<Vec<(String, Vec<u8>)>> {
        self.record("find_server_certificates");
        Ok(self.server_certs.clone())
    }

    async fn set_trust(&self, nickname: &str, trust: TrustFlags) -> Result<()> {
        self.record("set_trust");
        self.trust_changes
            .lock()
            .unwrap()
            .push((nickname.to_string(), trust));
        Ok(())
    }

    async fn list_chain_nicknames(&self, _nickname: &str) -> Result<Vec<String>> {
        self.record("list_chain_nicknames");
        Ok(self.chain_nicknames.clone())
    }

    async fn export_client_identity(&self, nickname: &str) -> Result<ClientIdentity> {
        self.record("export_client_identity");
        self.identity
            .clone()
            .ok_or_else(|| InstallError::precondition_missing(format!("no key for {}", nickname)))
    }

    async fn export_pkcs12(&self, nickname: &str, output: &Path, _password_file: &Path) -> Result<()> {
        self.record(&format!("export_pkcs12 {} {}", nickname, output.display()));
        Ok(())
    }

    async fn import_pkcs12(&self, input: &Path, _password_file: &Path) -> Result<()> {
        self.record(&format!("import_pkcs12 {}", input.display()));
        Ok(())
    }
}

/// Directory that records entries and modifications.
#[derive(Default)]
pub struct RecordingDirectory {
    entries: Mutex<Vec<LdapEntry>>,
    modifications: Mutex<Vec<(String, Vec<LdapModification>)>>,
}

impl RecordingDirectory {
    /// An empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Added entries
    pub fn entries(&self) -> Vec<LdapEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Applied modifications as `(dn, changes)`
    pub fn modifications(&self) -> Vec<(String, Vec<LdapModification>)> {
        self.modifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl DirectoryService for RecordingDirectory {
    async fn add_entry(&self, entry: &LdapEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn modify(&self, dn: &str, changes: &[LdapModification]) -> Result<()> {
        self.modifications
            .lock()
            .unwrap()
            .push((dn.to_string(), changes.to_vec()));
        Ok(())
    }
}

/// Request for a self-signed authority served by `mock`
pub fn install_request(mock: &MockAuthority) -> pki_ca_install::config::InstallationRequestBuilder {
    InstallationRequest::builder()
        .realm("EXAMPLE.COM")
        .host_name("ipa.example.com")
        .dm_password("Secret123")
        .admin_password("Admin123")
        .ca_agent_db("/tmp/pki-ca-agent")
        .endpoints(mock.endpoints())
}

/// Host on which `pkicreate` lays down the files the installer edits
pub fn host_for(request: &InstallationRequest) -> FakeSystem {
    let profiles = request.instance_dir().join("profiles").join("ca");
    FakeSystem::new()
        .with_file("/usr/share/ipa/ipa-pki-proxy.conf", fixtures::PROXY_CONF)
        .creates_on_run("pkicreate", request.cs_cfg(), fixtures::CS_CFG)
        .creates_on_run("pkicreate", request.service_profile(), fixtures::SERVICE_PROFILE)
        .creates_on_run("pkicreate", profiles.join("caJarSigningCert.cfg"), fixtures::SIGNING_PROFILE)
}

/// Test fixture helpers
pub mod fixtures {
    use base64::prelude::*;
    use cms::cert::CertificateChoices;
    use cms::content_info::{CmsVersion, ContentInfo};
    use cms::signed_data::{CertificateSet, EncapsulatedContentInfo, SignedData, SignerInfos};
    use der::asn1::SetOfVec;
    use der::{Any, Decode, Encode};
    use pki_ca_install::ClientIdentity;
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};

    /// CSR returned by the recording database
    pub const CSR_PEM: &str = "-----BEGIN NEW CERTIFICATE REQUEST-----\n\
MIIBWTCBwwIBADAaMRgwFgYDVQQDEw9JUEEgUkEgRVhBTVBMRQ==\n\
-----END NEW CERTIFICATE REQUEST-----\n";

    /// `CS.cfg` as written by `pkicreate`
    pub const CS_CFG: &str = "\
ca.enableNonces=true
ca.publish.enable=false
preop.pin=Wl8bXNsq9NkTAaGz
";

    /// Service profile as shipped
    pub const SERVICE_PROFILE: &str = "\
policyset.serverCertSet.list=1,2,3,4,5,6,7,8
policyset.serverCertSet.1.default.params.name=CN=$request.req_subject_name.cn$, OU=pki-ipa, O=IPA
";

    /// Jar signing profile as shipped
    pub const SIGNING_PROFILE: &str = "auth.instance_id=AgentCertAuth\n";

    /// Web server proxy configuration
    pub const PROXY_CONF: &str = "ProxyPreserveHost On\n";

    /// A self-signed CA certificate for `O=<org>`
    pub fn ca_certificate(org: &str) -> (rcgen::Certificate, KeyPair) {
        let key = KeyPair::generate().expect("key generation");
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
        params
            .distinguished_name
            .push(DnType::CommonName, "Certificate Authority");
        params.distinguished_name.push(DnType::OrganizationName, org);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).expect("self-signed CA");
        (cert, key)
    }

    /// A certificate for `cn` issued by `issuer`
    pub fn issued_certificate(
        cn: &str,
        issuer: &rcgen::Certificate,
        issuer_key: &KeyPair,
    ) -> (rcgen::Certificate, KeyPair) {
        let key = KeyPair::generate().expect("key generation");
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
        params.distinguished_name.push(DnType::CommonName, cn);
        let cert = params
            .signed_by(&key, issuer, issuer_key)
            .expect("issued certificate");
        (cert, key)
    }

    /// Client identity of the CA agent
    pub fn agent_identity() -> ClientIdentity {
        let (ca, ca_key) = ca_certificate("EXAMPLE.COM");
        let (cert, key) = issued_certificate("ipa-ca-agent", &ca, &ca_key);
        ClientIdentity::new(cert.pem(), key.serialize_pem())
    }

    /// Bare base64 of a certificate's DER, as the authority returns it
    pub fn base64_der(cert: &rcgen::Certificate) -> String {
        BASE64_STANDARD.encode(cert.der())
    }

    /// A certs-only PKCS#7 structure (base64)
    pub fn certs_only_base64(certs: &[&rcgen::Certificate]) -> String {
        let choices: Vec<CertificateChoices> = certs
            .iter()
            .map(|cert| {
                let parsed = x509_cert::Certificate::from_der(cert.der()).expect("valid DER");
                CertificateChoices::Certificate(parsed)
            })
            .collect();

        let signed_data = SignedData {
            version: CmsVersion::V1,
            digest_algorithms: SetOfVec::new(),
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: const_oid::db::rfc5911::ID_DATA,
                econtent: None,
            },
            certificates: Some(CertificateSet(
                SetOfVec::try_from(choices).expect("certificate set"),
            )),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::new()),
        };

        let content_info = ContentInfo {
            content_type: const_oid::db::rfc5911::ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data).expect("encode SignedData"),
        };
        BASE64_STANDARD.encode(content_info.to_der().expect("encode ContentInfo"))
    }

    /// XML response to an accepted submission
    pub fn submit_response(request_id: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\
             <XMLResponse><Status>0</Status><Requests><Request>\
             <RequestId>{}</RequestId><SubjectDN>CN=IPA RA,O=EXAMPLE.COM</SubjectDN>\
             </Request></Requests></XMLResponse>",
            request_id
        )
    }

    /// XML response carrying the authority chain
    pub fn chain_response(pkcs7_base64: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\
             <XMLResponse><Status>0</Status><ChainBase64>{}</ChainBase64></XMLResponse>",
            pkcs7_base64
        )
    }

    /// Review page of `request_id`: two editable fields and one readonly
    pub fn review_page(request_id: &str) -> String {
        format!(
            "<html><script>\r\n\
             var inputPluginListDesc = new Array();\r\n\
             requestId = \"{id}\";\r\n\
             defList = new Object();\r\n\
             defList.defId = \"sn_uid\";\r\n\
             defList.defSyntax = \"string\";\r\n\
             defList.defVal = \"ipara\";\r\n\
             defList = new Object();\r\n\
             defList.defId = \"notAfter\";\r\n\
             defList.defVal = \"2028-10-19 00:00:00\";\r\n\
             defList = new Object();\r\n\
             defList.defId = \"keyAlgorithm\";\r\n\
             defList.defConstraint = \"readonly\";\r\n\
             defList.defVal = \"RSA\";\r\n\
             </script></html>\r\n",
            id = request_id
        )
    }

    /// Approval page issuing `b64_cert`
    pub fn approval_page(b64_cert: &str) -> String {
        format!(
            "<html><script>\r\n\
             outputList = new Object();\r\n\
             outputList.outputId = \"pretty_cert\";\r\n\
             outputList.outputVal = \"Certificate:\\n    Data:\";\r\n\
             outputList = new Object();\r\n\
             outputList.outputId = \"b64_cert\";\r\n\
             outputList.outputVal = \"{}\";\r\n\
             </script></html>\r\n",
            b64_cert
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_authority_starts() {
        let mock = MockAuthority::start().await;
        assert!(mock.url().starts_with("http://"));
        assert_eq!(
            mock.endpoints().build_ee_url("profileSubmit").path(),
            PATH_SUBMIT
        );
    }

    #[tokio::test]
    async fn test_fake_system_files() {
        let sys = FakeSystem::new().with_file("/etc/pki-ca/CS.cfg", "a=b\n");
        assert!(sys.path_exists(Path::new("/etc/pki-ca")).await);
        assert!(!sys.path_exists(Path::new("/etc/pki")).await);
        assert_eq!(sys.read_to_string(Path::new("/etc/pki-ca/CS.cfg")).await.unwrap(), "a=b\n");
        assert!(sys.read_to_string(Path::new("/missing")).await.is_err());
    }
}
