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

//! # pki-ca-install
//!
//! Staged installer for a certificate authority instance.
//!
//! An install is a fixed list of named steps planned from an
//! [`InstallationRequest`]. The plan depends on how the authority is signed:
//!
//! - **self-signed**: every step runs in one pass
//! - **external CA, first phase**: the CSR is written and the run halts
//! - **external CA, second phase**: the signed certificate and chain are imported
//! - **clone**: the identity of an existing authority is imported
//!
//! Once the authority is up, an RA agent certificate is enrolled through the
//! authority's web interfaces with [`EnrollmentClient`]. Responses from those
//! interfaces are line-oriented script bodies read by [`parser`].
//!
//! Host effects go through the capability traits in [`capabilities`] so the
//! whole flow can run against fakes. Values needed to undo the install are
//! recorded in a [`state::StateStore`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use pki_ca_install::capabilities::HostCapabilities;
//! use pki_ca_install::install::CaInstance;
//! use pki_ca_install::sequencer::{StepSequencer, TracingProgress};
//! use pki_ca_install::state::{FileStateStore, SharedStateStore};
//! use pki_ca_install::InstallationRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let request = InstallationRequest::builder()
//!         .realm("EXAMPLE.COM")
//!         .host_name("ipa.example.com")
//!         .dm_password("Secret123")
//!         .build()?;
//!
//!     let state = SharedStateStore::new(FileStateStore::open("/var/lib/ca-install/sysrestore.state")?);
//!     let mut ca = CaInstance::new(request, Arc::new(HostCapabilities::default()), state);
//!
//!     let outcome = ca.install(&StepSequencer::new(TracingProgress)).await?;
//!     if let Some(message) = outcome.next_step_message() {
//!         println!("{}", message);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod capabilities;
pub mod config;
pub mod directive;
pub mod enrollment;
pub mod error;
pub mod install;
pub mod loader;
pub mod logging;
pub mod parser;
pub mod sequencer;
pub mod signing;
pub mod state;
pub mod tls;
pub mod trust;
pub mod types;

pub use config::{AuthorityEndpoints, ClientIdentity, InstallationRequest, TrustAnchors};
pub use enrollment::EnrollmentClient;
pub use error::{ErrorKind, InstallError, Result};
pub use install::{CaInstance, InstallOutcome};
pub use loader::InstallerFile;
pub use parser::{BlockKind, ResponseDocument};
pub use signing::{CaStep, SigningMode};
pub use types::{CaChain, EnrollmentSession, IssuedCertificate, PendingRequest};

// Re-export x509-cert types for convenience
pub use x509_cert::Certificate;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("pki-ca-install/", env!("CARGO_PKG_VERSION"));
