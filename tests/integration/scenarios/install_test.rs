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

//! Integration tests for the staged authority install

use std::path::PathBuf;
use std::sync::Arc;

use crate::integration::{
    fixtures, host_for, install_request, FakeSystem, MockAuthority, RecordingDirectory,
    RecordingTrustDatabase, PATH_CHAIN, PATH_SUBMIT,
};
use pki_ca_install::capabilities::{ServiceAction, TrustFlags};
use pki_ca_install::config::ports;
use pki_ca_install::install::{CaInstance, InstallOutcome, CA_SERVICE, RESUME_COMMAND};
use pki_ca_install::sequencer::{ProgressEvent, RecordingProgress, StepSequencer};
use pki_ca_install::state::{MemoryStateStore, SharedStateStore, StateValue, CA_UNIT};
use pki_ca_install::{ErrorKind, InstallationRequest, TrustAnchors};

/// Fakes wired into one installer.
struct Harness {
    sys: Arc<FakeSystem>,
    state: SharedStateStore,
    ra_db: Arc<RecordingTrustDatabase>,
    agent_db: Arc<RecordingTrustDatabase>,
    directory: Arc<RecordingDirectory>,
}

impl Harness {
    fn new(sys: FakeSystem) -> Self {
        Self {
            sys: Arc::new(sys),
            state: SharedStateStore::new(MemoryStateStore::new()),
            ra_db: Arc::new(RecordingTrustDatabase::new()),
            agent_db: Arc::new(
                RecordingTrustDatabase::new()
                    .with_identity(fixtures::agent_identity())
                    .with_chain_nicknames(&["EXAMPLE.COM IPA CA"]),
            ),
            directory: Arc::new(RecordingDirectory::new()),
        }
    }

    fn installer(&self, request: InstallationRequest) -> CaInstance {
        CaInstance::new(request, self.sys.clone(), self.state.clone())
            .with_ra_database(self.ra_db.clone())
            .with_agent_database(self.agent_db.clone())
            .with_directory(self.directory.clone())
    }
}

/// Mount every endpoint a complete install talks to; returns the RA certificate.
async fn mount_authority(mock: &MockAuthority) -> String {
    let (ca, ca_key) = fixtures::ca_certificate("EXAMPLE.COM");
    let (ra, _) = fixtures::issued_certificate("IPA RA", &ca, &ca_key);
    let b64_cert = fixtures::base64_der(&ra);

    mock.mock_cert_chain(&fixtures::certs_only_base64(&[&ca])).await;
    mock.mock_submit("1001").await;
    mock.mock_review("1001", &fixtures::review_page("1001")).await;
    mock.mock_approve(&b64_cert).await;

    b64_cert
}

#[tokio::test]
async fn test_self_signed_install_runs_every_step() {
    let mock = MockAuthority::start().await;
    let b64_cert = mount_authority(&mock).await;

    let request = install_request(&mock).build().unwrap();
    let harness = Harness::new(host_for(&request));
    let mut ca = harness.installer(request.clone());

    let progress = RecordingProgress::new();
    let outcome = ca
        .install(&StepSequencer::new(&progress))
        .await
        .expect("install failed");

    assert_eq!(outcome, InstallOutcome::Completed);
    assert_eq!(outcome.next_step_message(), None);

    let steps = progress.started_steps();
    assert_eq!(steps.len(), 18);
    assert_eq!(steps[0], "creating certificate server user");
    assert_eq!(steps[1], "creating pki-ca instance");
    assert_eq!(steps[17], "Configure HTTP to proxy connections");

    // Chain imported before the RA certificate
    assert_eq!(
        harness.ra_db.imported_nicknames(),
        vec!["EXAMPLE.COM IPA CA".to_string(), "ipaCert".to_string()]
    );
    assert_eq!(harness.ra_db.imports()[1].1, b64_cert);

    // The agent database trusts the chain before authenticating with it
    assert_eq!(
        harness.agent_db.trust_changes(),
        vec![("EXAMPLE.COM IPA CA".to_string(), TrustFlags::CertificateAuthority)]
    );

    // RA agent registered in the directory
    let entries = harness.directory.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].dn, "uid=ipara,ou=People,o=ipaca");
    assert_eq!(harness.directory.modifications().len(), 2);

    assert_eq!(ca.ra_request_id(), Some("1001"));
    assert!(ca.ra_certificate().is_some());
    assert!(ca.session().is_none());

    // Agent calls verify the server against the imported chain
    let agent = ca.agent_endpoints().expect("chain imported");
    match agent.trust_anchors {
        TrustAnchors::Explicit(anchors) => assert_eq!(
            anchors,
            vec![harness.ra_db.imports()[0].1.clone().into_bytes()]
        ),
        other => panic!("agent endpoints not anchored: {:?}", other),
    }
}

#[tokio::test]
async fn test_self_signed_install_edits_configuration() {
    let mock = MockAuthority::start().await;
    mount_authority(&mock).await;

    let request = install_request(&mock).build().unwrap();
    let harness = Harness::new(host_for(&request));
    let mut ca = harness.installer(request.clone());
    ca.install(&StepSequencer::new(RecordingProgress::new()))
        .await
        .expect("install failed");

    let sys = &harness.sys;
    let cs_cfg = sys.file(request.cs_cfg()).unwrap();
    assert!(cs_cfg.contains("ca.enableNonces=false"));
    assert!(cs_cfg.contains("ca.publish.enable=true"));
    assert!(cs_cfg.contains("ca.publish.rule.instance.FileCrlRule.predicate="));

    let profile = sys.file(request.service_profile()).unwrap();
    assert!(profile.contains("policyset.serverCertSet.list=1,2,3,4,5,6,7,8,10"));
    assert!(profile.contains("cn$, O=EXAMPLE.COM"));
    assert!(!profile.contains("OU=pki-ipa, O=IPA"));
    assert!(profile.contains("https://ipa.example.com/ipa/crl/MasterCRL.bin"));

    let signing = sys
        .file(request.instance_dir().join("profiles/ca/caJarSigningCert.cfg"))
        .unwrap();
    assert!(signing.contains("auth.instance_id=raCertAuth"));

    assert!(sys.file("/etc/httpd/conf.d/ipa-pki-proxy.conf").is_some());
    assert_eq!(sys.mode(request.ra_agent_pwd()), Some(0o400));

    // Secrets never show up in logged command lines
    assert!(sys.ran("pkisilent ConfigureCA"));
    for line in sys.command_lines() {
        assert!(!line.contains("Secret123"), "leaked: {}", line);
        assert!(!line.contains("Admin123"), "leaked: {}", line);
    }

    assert!(sys
        .service_calls()
        .contains(&(CA_SERVICE.to_string(), ServiceAction::Restart)));

    // Undo state recorded for uninstall
    assert_eq!(
        harness.state.restore(CA_UNIT, "user_exists").unwrap(),
        Some(StateValue::Bool(false))
    );
    assert_eq!(
        harness.state.restore(CA_UNIT, "enabled").unwrap(),
        Some(StateValue::Bool(false))
    );
}

#[tokio::test]
async fn test_external_ca_first_phase_stops_with_csr() {
    let mock = MockAuthority::start().await;

    let request = install_request(&mock)
        .csr_file("/root/ipa.csr")
        .build()
        .unwrap();
    let harness = Harness::new(
        host_for(&request).creates_on_run("pkisilent", "/root/ipa.csr", fixtures::CSR_PEM),
    );
    let mut ca = harness.installer(request);

    let progress = RecordingProgress::new();
    let outcome = ca
        .install(&StepSequencer::new(&progress))
        .await
        .expect("install failed");

    assert_eq!(
        outcome,
        InstallOutcome::CsrPending {
            csr_file: PathBuf::from("/root/ipa.csr"),
            resume_command: RESUME_COMMAND.to_string(),
        }
    );
    let message = outcome.next_step_message().unwrap();
    assert!(message.contains("/root/ipa.csr"));
    assert!(message.contains("--signed-cert"));

    assert_eq!(
        progress.started_steps().last().map(String::as_str),
        Some("configuring certificate server instance")
    );
    assert!(matches!(
        progress.events().last(),
        Some(ProgressEvent::Halted { .. })
    ));

    let sys = &harness.sys;
    assert!(sys.ran("-external true -ext_csr_file /root/ipa.csr"));
    assert_eq!(sys.file("/root/ipa.csr").as_deref(), Some(fixtures::CSR_PEM));

    // No enrollment happens before the CA certificate is signed
    assert!(mock.requests_to(PATH_CHAIN).await.is_empty());
    assert!(mock.requests_to(PATH_SUBMIT).await.is_empty());
    assert!(harness.ra_db.calls().is_empty());
}

#[tokio::test]
async fn test_external_ca_second_phase_reuses_instance() {
    let mock = MockAuthority::start().await;
    mount_authority(&mock).await;

    let request = install_request(&mock)
        .signed_cert("/root/ipa.crt", "/root/chain.pem")
        .build()
        .unwrap();

    // The first phase left the instance behind
    let profiles = request.instance_dir().join("profiles").join("ca");
    let sys = FakeSystem::new()
        .with_file("/usr/share/ipa/ipa-pki-proxy.conf", fixtures::PROXY_CONF)
        .with_file(request.cs_cfg(), fixtures::CS_CFG)
        .with_file(request.service_profile(), fixtures::SERVICE_PROFILE)
        .with_file(profiles.join("caJarSigningCert.cfg"), fixtures::SIGNING_PROFILE)
        .with_user("pkiuser");
    let harness = Harness::new(sys);
    let mut ca = harness.installer(request);

    assert!(ca.is_installed().await);

    let progress = RecordingProgress::new();
    let outcome = ca.install(&StepSequencer::new(&progress)).await.unwrap();
    assert_eq!(outcome, InstallOutcome::Completed);

    let steps = progress.started_steps();
    assert!(!steps.iter().any(|s| s == "creating pki-ca instance"));
    assert_eq!(steps.len(), 17);

    let sys = &harness.sys;
    assert!(sys.ran("-ext_ca_cert_file /root/ipa.crt -ext_ca_cert_chain_file /root/chain.pem"));
    assert!(!sys.ran("useradd"));
}

#[tokio::test]
async fn test_failed_step_is_named() {
    let mock = MockAuthority::start().await;

    let request = install_request(&mock).build().unwrap();
    let harness = Harness::new(host_for(&request).with_failing("pkisilent", "ConfigureCA: bad pin"));
    let mut ca = harness.installer(request);

    let progress = RecordingProgress::new();
    let err = ca
        .install(&StepSequencer::new(&progress))
        .await
        .unwrap_err();

    assert_eq!(err.failed_step(), Some("configuring certificate server instance"));
    assert_eq!(err.kind(), ErrorKind::ExternalToolFailure);
    assert!(err
        .to_string()
        .starts_with("step 'configuring certificate server instance' failed:"));

    // Nothing after the failed step ran
    assert_eq!(progress.started_steps().len(), 3);
    assert!(matches!(
        progress.events().last(),
        Some(ProgressEvent::Failed { .. })
    ));
}

#[tokio::test]
async fn test_port_wait_timeout_fails_restart() {
    let mock = MockAuthority::start().await;
    mount_authority(&mock).await;

    let request = install_request(&mock).build().unwrap();
    let harness = Harness::new(host_for(&request).with_closed_port(ports::UNSECURE));
    let mut ca = harness.installer(request);

    let err = ca
        .install(&StepSequencer::new(RecordingProgress::new()))
        .await
        .unwrap_err();

    assert_eq!(err.failed_step(), Some("restarting certificate server"));
    assert_eq!(err.kind(), ErrorKind::ExternalToolFailure);

    // Enrollment never started
    assert!(mock.requests_to(PATH_SUBMIT).await.is_empty());
    assert_eq!(ca.ra_request_id(), None);
}

#[tokio::test]
async fn test_unconfigured_instance_without_preop_pin() {
    let mock = MockAuthority::start().await;

    let request = install_request(&mock).build().unwrap();
    let sys = FakeSystem::new().creates_on_run("pkicreate", request.cs_cfg(), "ca.enableNonces=true\n");
    let harness = Harness::new(sys);
    let mut ca = harness.installer(request);

    let err = ca
        .install(&StepSequencer::new(RecordingProgress::new()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PreconditionMissing);
    assert!(err.to_string().contains("preop.pin"));
}

#[tokio::test]
async fn test_rejected_ra_submission_fails_install() {
    let mock = MockAuthority::start().await;
    let (ca_cert, _) = fixtures::ca_certificate("EXAMPLE.COM");
    mock.mock_cert_chain(&fixtures::certs_only_base64(&[&ca_cert])).await;
    mock.mock_submit_response(500, "Internal Server Error").await;

    let request = install_request(&mock).build().unwrap();
    let harness = Harness::new(host_for(&request));
    let mut ca = harness.installer(request);

    let err = ca
        .install(&StepSequencer::new(RecordingProgress::new()))
        .await
        .unwrap_err();

    assert_eq!(err.failed_step(), Some("requesting RA certificate from CA"));
    assert_eq!(err.kind(), ErrorKind::SubmissionRejected);
    assert!(harness.directory.entries().is_empty());
}
