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

//! Signing mode selection and step planning for the authority install.
//!
//! An authority is either self-signed, or signed by an external CA in two
//! phases: the first run generates a CSR and stops, the second run is given
//! the signed certificate and its chain and completes the install. The mode
//! decides which steps are scheduled; [`plan`] is a pure function of the
//! request and a few facts about the host.

use crate::config::InstallationRequest;
use crate::sequencer::{schedule, Step};

/// Description of the authority install run.
pub const CA_INSTALL_DESCRIPTION: &str = "Configuring certificate server";

/// Rough duration of the authority install run, in seconds.
pub const CA_INSTALL_COST: u32 = 210;

/// How the authority's signing certificate is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningMode {
    /// Self-signed authority; full install.
    SelfContained,
    /// First external phase: write a CSR and stop.
    CsrPending,
    /// Second external phase: install the externally-signed certificate.
    Finalize,
}

impl SigningMode {
    /// Select the mode from the request's inputs.
    pub fn from_request(request: &InstallationRequest) -> Self {
        if request.csr_file.is_some() {
            Self::CsrPending
        } else if request.signed_cert_file.is_some() && request.cert_chain_file.is_some() {
            Self::Finalize
        } else {
            Self::SelfContained
        }
    }

    /// Returns true if the authority is signed by an external CA.
    pub fn is_external(self) -> bool {
        !matches!(self, Self::SelfContained)
    }
}

/// Every step of the authority install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaStep {
    /// Create the system account owning the instance.
    CreateUser,
    /// Create the instance directory tree.
    CreateInstance,
    /// Run the instance configuration wizard.
    ConfigureInstance,
    /// Turn off request nonces.
    DisableNonces,
    /// Export the CA agent credentials to a PKCS#12 file.
    CreateAgentPkcs12,
    /// Create the RA agent certificate database.
    CreateRaAgentDb,
    /// Import the authority chain into the RA agent database.
    ImportCaChain,
    /// Fix ownership and modes of the RA agent database.
    FixRaPermissions,
    /// Let RA agents issue signing certificates automatically.
    SetupSigningProfile,
    /// Publish CRLs to files instead of LDAP.
    EnableCrlPublishing,
    /// Put the subject base into the service profile.
    SetSubjectBase,
    /// Add the Subject Key Identifier extension to the service profile.
    EnableSubjectKeyIdentifier,
    /// Remember whether the service started on boot.
    EnableOnBoot,
    /// Restart the authority and wait for it to listen.
    Restart,
    /// Generate the RA key and submit its CSR.
    RequestRaCertificate,
    /// Approve the RA request and import the certificate.
    IssueRaCertificate,
    /// Register the RA as a trusted agent in the directory.
    ConfigureRaAgent,
    /// Install the web server proxy configuration.
    ConfigureHttpProxy,
}

impl CaStep {
    /// Name reported in progress output and failures.
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateUser => "creating certificate server user",
            Self::CreateInstance => "creating pki-ca instance",
            Self::ConfigureInstance => "configuring certificate server instance",
            Self::DisableNonces => "disabling nonces",
            Self::CreateAgentPkcs12 => "creating CA agent PKCS#12 file in /root",
            Self::CreateRaAgentDb => "creating RA agent certificate database",
            Self::ImportCaChain => "importing CA chain to RA certificate database",
            Self::FixRaPermissions => "fixing RA database permissions",
            Self::SetupSigningProfile => "setting up signing cert profile",
            Self::EnableCrlPublishing => "set up CRL publishing",
            Self::SetSubjectBase => "set certificate subject base",
            Self::EnableSubjectKeyIdentifier => "enabling Subject Key Identifier",
            Self::EnableOnBoot => "configuring certificate server to start on boot",
            Self::Restart => "restarting certificate server",
            Self::RequestRaCertificate => "requesting RA certificate from CA",
            Self::IssueRaCertificate => "issuing RA agent certificate",
            Self::ConfigureRaAgent => "adding RA agent as a trusted user",
            Self::ConfigureHttpProxy => "Configure HTTP to proxy connections",
        }
    }

    /// Returns true for the steps that enroll the RA agent.
    pub fn is_enrollment(self) -> bool {
        matches!(
            self,
            Self::RequestRaCertificate | Self::IssueRaCertificate | Self::ConfigureRaAgent
        )
    }
}

impl std::fmt::Display for CaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Facts about the host that influence planning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanFacts {
    /// The instance directory already exists.
    pub instance_exists: bool,
}

/// Ordered list of actions for one install attempt.
pub fn plan_actions(request: &InstallationRequest, facts: PlanFacts) -> Vec<CaStep> {
    let mode = SigningMode::from_request(request);
    let clone = request.is_clone();

    let mut actions = vec![CaStep::CreateUser];
    if !facts.instance_exists {
        actions.push(CaStep::CreateInstance);
    }
    actions.push(CaStep::ConfigureInstance);
    actions.push(CaStep::DisableNonces);

    // The first external phase ends once the CSR has been written.
    if mode == SigningMode::CsrPending {
        return actions;
    }

    if !clone {
        actions.push(CaStep::CreateAgentPkcs12);
    }
    if request.create_ra_agent_db {
        actions.push(CaStep::CreateRaAgentDb);
    }
    actions.extend([
        CaStep::ImportCaChain,
        CaStep::FixRaPermissions,
        CaStep::SetupSigningProfile,
        CaStep::EnableCrlPublishing,
        CaStep::SetSubjectBase,
        CaStep::EnableSubjectKeyIdentifier,
        CaStep::EnableOnBoot,
    ]);
    if !clone {
        actions.extend([
            CaStep::Restart,
            CaStep::RequestRaCertificate,
            CaStep::IssueRaCertificate,
            CaStep::ConfigureRaAgent,
        ]);
    }
    actions.push(CaStep::ConfigureHttpProxy);

    actions
}

/// Schedule the authority install for a request.
pub fn plan(request: &InstallationRequest, facts: PlanFacts) -> Vec<Step<CaStep>> {
    schedule(
        plan_actions(request, facts)
            .into_iter()
            .map(|action| (action.name(), action)),
    )
}
