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

//! Certificate authority installer.
//!
//! # Usage
//!
//! ```text
//! ca-install [OPTIONS] <COMMAND>
//!
//! Commands:
//!   install     Install the directory server and the certificate authority
//!   uninstall   Remove both, restoring the recorded host state
//!   replica     Install a clone of the master's authority from a replica file
//!   parse-dump  Parse a saved authority response and print it as JSON
//!
//! Options:
//!   -v, --verbose...        More output (repeat for trace)
//!   -q, --quiet             Only errors
//!       --log-file <PATH>   Append logs to a file instead of stderr
//!       --state-file <PATH> Where uninstall state is recorded
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Self-signed authority
//! ca-install install --realm EXAMPLE.COM --host-name ipa.example.com --dm-password Secret123
//!
//! # External CA, first phase
//! ca-install install --config install.toml --external-csr /root/ipa.csr
//!
//! # External CA, second phase
//! ca-install install --config install.toml \
//!     --signed-cert /root/ipa.crt --cert-chain /root/chain.pem
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use pki_ca_install::capabilities::{HostCapabilities, SystemCapabilities};
use pki_ca_install::install::{install_replica_ca, CaDirectoryInstance, CaInstance, ReplicaConfig, ReplicaOutcome};
use pki_ca_install::logging::{self, LogConfig};
use pki_ca_install::parser::{self, BlockKind};
use pki_ca_install::sequencer::{StepSequencer, TracingProgress};
use pki_ca_install::state::{FileStateStore, SharedStateStore};
use pki_ca_install::config::ports;
use pki_ca_install::loader::AuthoritySection;
use pki_ca_install::{InstallError, InstallOutcome, InstallationRequest, InstallerFile};

const DEFAULT_STATE_FILE: &str = "/var/lib/ca-install/sysrestore.state";

/// Certificate authority installer
#[derive(Parser)]
#[command(name = "ca-install")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Install a certificate authority instance", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// More output (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Append logs to a file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Where uninstall state is recorded
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_STATE_FILE)]
    state_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the directory server and the certificate authority
    Install(Box<InstallArgs>),

    /// Remove the authority and its directory server
    Uninstall {
        /// Parent directory of the authority instance
        #[arg(long, value_name = "DIR", default_value = "/var/lib")]
        instance_root: PathBuf,
    },

    /// Install a clone of the master's authority from a replica file
    Replica {
        /// Unpacked replica file directory
        #[arg(long, value_name = "DIR")]
        dir: PathBuf,

        /// Realm name
        #[arg(long)]
        realm: String,

        /// Fully-qualified host name of this replica
        #[arg(long)]
        host_name: String,

        /// Host name of the master
        #[arg(long)]
        master_host: String,

        /// Directory manager password
        #[arg(long)]
        dm_password: String,

        /// Certificate subject base
        #[arg(long)]
        subject_base: Option<String>,

        /// Only describe the authority, do not install it
        #[arg(long)]
        no_setup_ca: bool,

        /// The replica is already running
        #[arg(long)]
        postinstall: bool,
    },

    /// Parse a saved authority response and print it as JSON
    ParseDump {
        /// Saved response body
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Block shape to look for
        #[arg(long, value_enum, default_value_t = BlockArg::DefList)]
        block: BlockArg,
    },
}

#[derive(clap::Args)]
struct InstallArgs {
    /// TOML installer file; flags override its values
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Realm name
    #[arg(long)]
    realm: Option<String>,

    /// Fully-qualified host name of this machine
    #[arg(long)]
    host_name: Option<String>,

    /// Directory manager password
    #[arg(long)]
    dm_password: Option<String>,

    /// Authority administrator password
    #[arg(long)]
    admin_password: Option<String>,

    /// Directory server port
    #[arg(long)]
    ds_port: Option<u16>,

    /// Certificate subject base
    #[arg(long)]
    subject_base: Option<String>,

    /// Write a CSR for an external CA here and stop
    #[arg(long, value_name = "PATH", conflicts_with_all = ["signed_cert", "cert_chain"])]
    external_csr: Option<PathBuf>,

    /// Certificate signed by the external CA
    #[arg(long, value_name = "PATH", requires = "cert_chain")]
    signed_cert: Option<PathBuf>,

    /// Chain of the external CA
    #[arg(long, value_name = "PATH", requires = "signed_cert")]
    cert_chain: Option<PathBuf>,

    /// Keep the existing RA agent database
    #[arg(long)]
    keep_ra_agent_db: bool,

    /// The directory server is already installed
    #[arg(long)]
    skip_ds: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum BlockArg {
    DefList,
    OutputList,
}

impl From<BlockArg> for BlockKind {
    fn from(arg: BlockArg) -> Self {
        match arg {
            BlockArg::DefList => BlockKind::DefList,
            BlockArg::OutputList => BlockKind::OutputList,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_flags(cli.verbose, cli.quiet);
    if let Some(path) = &cli.log_file {
        log_config = log_config.with_log_file(path);
    }
    if let Err(e) = logging::init(&log_config) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_command(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // StepFailed already reads "step '<name>' failed: <cause>"
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_command(cli: Cli) -> Result<(), InstallError> {
    match cli.command {
        Commands::Install(args) => {
            let request = build_request(&args)?;
            let (sys, state) = host(&cli.state_file)?;
            let sequencer = StepSequencer::new(TracingProgress);

            // The second external phase reuses the directory from the first.
            if !args.skip_ds && request.signed_cert_file.is_none() {
                let mut ds = CaDirectoryInstance::new(&request, sys.clone(), state.clone());
                ds.install(&sequencer).await?;
            }

            let mut ca = CaInstance::new(request, sys, state);
            let outcome = ca.install(&sequencer).await?;
            report(&outcome);
            Ok(())
        }

        Commands::Uninstall { instance_root } => {
            // Removal is driven by the recorded state and the instance root.
            let request = InstallationRequest::builder()
                .realm("LOCALDOMAIN")
                .host_name("localhost.localdomain")
                .dm_password("")
                .instance_root(instance_root)
                .build()
                .map_err(InstallError::config)?;
            let (sys, state) = host(&cli.state_file)?;

            CaInstance::new(request.clone(), sys.clone(), state.clone())
                .uninstall()
                .await?;
            CaDirectoryInstance::new(&request, sys, state).uninstall().await?;
            println!("The certificate authority has been removed.");
            Ok(())
        }

        Commands::Replica {
            dir,
            realm,
            host_name,
            master_host,
            dm_password,
            subject_base,
            no_setup_ca,
            postinstall,
        } => {
            let config = ReplicaConfig {
                dir,
                realm,
                host_name,
                dirman_password: dm_password,
                master_host,
                subject_base,
                setup_ca: !no_setup_ca,
            };
            let (sys, state) = host(&cli.state_file)?;
            let sequencer = StepSequencer::new(TracingProgress);

            match install_replica_ca(&config, postinstall, sys, state, &sequencer).await? {
                ReplicaOutcome::SelfSigned => {
                    println!("The master has no certificate authority to clone.")
                }
                ReplicaOutcome::Deferred(_) => println!("Certificate authority not installed."),
                ReplicaOutcome::Installed(_) => println!("Certificate authority clone installed."),
            }
            Ok(())
        }

        Commands::ParseDump { file, block } => {
            let body = std::fs::read_to_string(&file)?;
            let document = parser::parse(block.into(), &body);
            let json = serde_json::to_string_pretty(&document)
                .map_err(|e| InstallError::config(format!("JSON encode: {e}")))?;
            println!("{}", json);
            Ok(())
        }
    }
}

fn host(state_file: &std::path::Path) -> Result<(Arc<dyn SystemCapabilities>, SharedStateStore), InstallError> {
    let sys: Arc<dyn SystemCapabilities> = Arc::new(HostCapabilities::default());
    let state = SharedStateStore::new(FileStateStore::open(state_file)?);
    Ok((sys, state))
}

fn report(outcome: &InstallOutcome) {
    match outcome.next_step_message() {
        Some(message) => println!("{}", message),
        None => println!("Certificate authority installed."),
    }
}

/// Merge the installer file, if any, with command-line overrides.
///
/// Missing required values are reported by [`InstallerFile::validate`].
fn build_request(args: &InstallArgs) -> Result<InstallationRequest, InstallError> {
    let mut file = match &args.config {
        Some(path) => InstallerFile::load(path)?,
        None => InstallerFile {
            authority: AuthoritySection {
                realm: String::new(),
                host_name: String::new(),
                dm_password: String::new(),
                admin_password: None,
                ds_port: ports::DEFAULT_DS,
                subject_base: None,
            },
            clone: None,
            external: Default::default(),
            paths: Default::default(),
            timeouts: Default::default(),
        },
    };

    if let Some(realm) = &args.realm {
        file.authority.realm = realm.clone();
    }
    if let Some(host_name) = &args.host_name {
        file.authority.host_name = host_name.clone();
    }
    if let Some(password) = &args.dm_password {
        file.authority.dm_password = password.clone();
    }
    if let Some(password) = &args.admin_password {
        file.authority.admin_password = Some(password.clone());
    }
    if let Some(port) = args.ds_port {
        file.authority.ds_port = port;
    }
    if let Some(base) = &args.subject_base {
        file.authority.subject_base = Some(base.clone());
    }
    if let Some(csr) = &args.external_csr {
        file.external.csr_file = Some(csr.clone());
        file.external.signed_cert = None;
        file.external.cert_chain = None;
    }
    if let (Some(cert), Some(chain)) = (&args.signed_cert, &args.cert_chain) {
        file.external.csr_file = None;
        file.external.signed_cert = Some(cert.clone());
        file.external.cert_chain = Some(chain.clone());
    }
    if args.keep_ra_agent_db {
        file.paths.create_ra_agent_db = false;
    }

    file.into_request()
}

