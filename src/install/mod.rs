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

//! Installers for the certificate authority and its directory server.
//!
//! - [`CaInstance`]: the authority itself, driven by [`crate::signing::plan`]
//! - [`CaDirectoryInstance`]: the directory server holding the authority's data
//! - [`install_replica_ca`]: both of the above for a clone of an existing authority

mod ca;
mod directory;
mod replica;

pub use ca::{CaInstance, CA_SERVICE};
pub use directory::{CaDirectoryInstance, DsStep, DS_INSTALL_COST, DS_INSTALL_DESCRIPTION, DS_SERVER_ID};
pub use replica::{install_replica_ca, ReplicaConfig, ReplicaOutcome};

use std::path::PathBuf;

/// Command an operator runs to finish an externally-signed install.
pub const RESUME_COMMAND: &str =
    "ca-install install --signed-cert /path/to/signed_certificate --cert-chain /path/to/external_ca_certificate";

/// How an install attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Every planned step ran.
    Completed,

    /// The CSR for the external CA was written and the run stopped.
    CsrPending {
        /// Where the CSR was written.
        csr_file: PathBuf,
        /// How to continue once the certificate is signed.
        resume_command: String,
    },
}

impl InstallOutcome {
    /// Operator instructions for a pending CSR, `None` when complete.
    pub fn next_step_message(&self) -> Option<String> {
        match self {
            Self::Completed => None,
            Self::CsrPending {
                csr_file,
                resume_command,
            } => Some(format!(
                "The next step is to get {} signed by your CA and re-run the installer as:\n{}",
                csr_file.display(),
                resume_command
            )),
        }
    }
}
