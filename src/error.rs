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

//! Error types for the CA installer.
//!
//! Every failure maps onto a closed [`ErrorKind`]. All kinds except
//! [`ErrorKind::StateAbsent`] are fatal: they abort the running step
//! sequence and are reported with the failing step's name.

use thiserror::Error;

/// Result type alias using [`InstallError`].
pub type Result<T> = std::result::Result<T, InstallError>;

/// Closed classification of installer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A collaborator process or service returned non-zero or refused a connection.
    ExternalToolFailure,
    /// The authority returned a non-success HTTP status to an enrollment round-trip.
    SubmissionRejected,
    /// An expected structural element is missing from a parsed response.
    MalformedResponse,
    /// A required input or on-disk artifact is missing.
    PreconditionMissing,
    /// A restore was requested for a key that was never backed up.
    StateAbsent,
    /// Transport-level HTTP or TLS failure.
    Transport,
    /// Invalid configuration.
    Config,
    /// Local I/O failure.
    Io,
    /// Certificate, CMS or base64 decoding failure.
    Encoding,
}

/// Errors that can occur while installing or enrolling.
#[derive(Debug, Error)]
pub enum InstallError {
    /// A collaborator subprocess or service call failed.
    #[error("{tool} failed: {message}")]
    ExternalToolFailure {
        /// Tool or service that failed.
        tool: String,
        /// Failure detail (exit status, stderr, refusal reason).
        message: String,
    },

    /// The authority rejected an enrollment round-trip.
    #[error("Authority rejected request (HTTP {status}): {message}")]
    SubmissionRejected {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// A parsed response lacks an expected element.
    #[error("Malformed authority response: {0}")]
    MalformedResponse(String),

    /// A precondition for the install is not met.
    #[error("Precondition missing: {0}")]
    PreconditionMissing(String),

    /// Nothing was backed up under this key.
    #[error("No state recorded for '{key}' in unit '{unit}'")]
    StateAbsent {
        /// Installable unit name.
        unit: String,
        /// State key.
        key: String,
    },

    /// A step of an installation sequence failed.
    #[error("step '{step}' failed: {source}")]
    StepFailed {
        /// Name of the failing step.
        step: String,
        /// Underlying cause.
        #[source]
        source: Box<InstallError>,
    },

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to parse a CMS/PKCS#7 structure.
    #[error("CMS/PKCS#7 parsing error: {0}")]
    CmsParsing(String),

    /// Invalid PEM data.
    #[error("Invalid PEM data: {0}")]
    InvalidPem(String),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstallError {
    /// Create an external tool failure.
    pub fn external_tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalToolFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a submission rejected error.
    pub fn submission_rejected(status: u16, message: impl Into<String>) -> Self {
        Self::SubmissionRejected {
            status,
            message: message.into(),
        }
    }

    /// Create a malformed response error.
    pub fn malformed_response(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create a precondition missing error.
    pub fn precondition_missing(msg: impl Into<String>) -> Self {
        Self::PreconditionMissing(msg.into())
    }

    /// Create a state absent error.
    pub fn state_absent(unit: impl Into<String>, key: impl Into<String>) -> Self {
        Self::StateAbsent {
            unit: unit.into(),
            key: key.into(),
        }
    }

    /// Wrap an error with the name of the step that produced it.
    pub fn step_failed(step: impl Into<String>, source: InstallError) -> Self {
        Self::StepFailed {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Create a TLS error.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a CMS parsing error.
    pub fn cms_parsing(msg: impl Into<String>) -> Self {
        Self::CmsParsing(msg.into())
    }

    /// Create an invalid PEM error.
    pub fn invalid_pem(msg: impl Into<String>) -> Self {
        Self::InvalidPem(msg.into())
    }

    /// Classify this error. A step failure reports the kind of its cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ExternalToolFailure { .. } => ErrorKind::ExternalToolFailure,
            Self::SubmissionRejected { .. } => ErrorKind::SubmissionRejected,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::PreconditionMissing(_) => ErrorKind::PreconditionMissing,
            Self::StateAbsent { .. } => ErrorKind::StateAbsent,
            Self::StepFailed { source, .. } => source.kind(),
            Self::Tls(_) | Self::Http(_) | Self::Url(_) => ErrorKind::Transport,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::CmsParsing(_) | Self::InvalidPem(_) | Self::Base64(_) | Self::Der(_) => {
                ErrorKind::Encoding
            }
        }
    }

    /// Returns true if this error must abort the current step sequence.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::StateAbsent
    }

    /// Name of the failing step, if this error came out of a sequence run.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}
