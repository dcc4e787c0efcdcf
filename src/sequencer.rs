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

//! Staged execution of named installation steps.
//!
//! A run takes an ordered list of [`Step`]s and a [`StepRunner`] that knows
//! how to perform each action. Steps execute strictly in order. The first
//! failure stops the run and is reported with the step's name; nothing is
//! rolled back, undo is the job of the state recorded by earlier steps. A
//! step may also ask to halt, which ends the run successfully.
//!
//! Progress is reported through a [`ProgressHandler`].
//!
//! # Example
//!
//! ```no_run
//! use pki_ca_install::sequencer::{schedule, StepSequencer, TracingProgress};
//! # use pki_ca_install::sequencer::{StepFlow, StepRunner};
//! # struct Printer;
//! # #[async_trait::async_trait]
//! # impl StepRunner<&'static str> for Printer {
//! #     async fn run_step(&mut self, action: &&'static str) -> pki_ca_install::Result<StepFlow> {
//! #         println!("{}", action);
//! #         Ok(StepFlow::Continue)
//! #     }
//! # }
//!
//! # async fn example() -> pki_ca_install::Result<()> {
//! let steps = schedule([("first", "one"), ("second", "two")]);
//! let sequencer = StepSequencer::new(TracingProgress);
//! sequencer.run(&steps, "Configuring example", 10, &mut Printer).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{InstallError, Result};

/// A named action at a fixed position in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<A> {
    /// Human-readable step name, reported in progress and failures.
    pub name: String,
    /// What to do.
    pub action: A,
    /// 1-based position in the run.
    pub ordinal: usize,
}

/// Assign ordinals to an ordered list of named actions.
pub fn schedule<A, N, I>(items: I) -> Vec<Step<A>>
where
    N: Into<String>,
    I: IntoIterator<Item = (N, A)>,
{
    items
        .into_iter()
        .enumerate()
        .map(|(i, (name, action))| Step {
            name: name.into(),
            action,
            ordinal: i + 1,
        })
        .collect()
}

/// What the sequencer should do after a step succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFlow {
    /// Go on with the next step.
    Continue,
    /// Stop the run here as a success.
    Halt,
}

/// Successful terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Every step ran.
    Completed,
    /// A step asked to stop; later steps did not run.
    Halted {
        /// Name of the step that halted the run.
        step: String,
    },
}

/// Performs the actions of a run.
#[async_trait]
pub trait StepRunner<A: Send + Sync>: Send {
    /// Perform one action.
    async fn run_step(&mut self, action: &A) -> Result<StepFlow>;
}

/// Events emitted while a run progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The run is about to start.
    Starting {
        /// Description of the whole run.
        description: String,
        /// Rough total cost estimate in seconds.
        estimated_cost: u32,
    },

    /// A step is about to run.
    Running {
        /// 1-based position.
        ordinal: usize,
        /// Number of steps in the run.
        total: usize,
        /// Step name.
        name: String,
    },

    /// All steps ran.
    Completed {
        /// Description of the whole run.
        description: String,
    },

    /// A step stopped the run early.
    Halted {
        /// Step name.
        name: String,
    },

    /// A step failed.
    Failed {
        /// Step name.
        name: String,
        /// Failure message.
        error: String,
    },
}

/// Handler for progress events.
///
/// Implement this trait to receive notifications about a run.
pub trait ProgressHandler: Send + Sync {
    /// Handle a progress event.
    fn handle_event(&self, event: ProgressEvent);
}

/// Reports progress through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressHandler for TracingProgress {
    fn handle_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Starting {
                description,
                estimated_cost,
            } => {
                tracing::info!(
                    "{}: Estimated time {} seconds",
                    description,
                    estimated_cost
                );
            }
            ProgressEvent::Running {
                ordinal,
                total,
                name,
            } => {
                tracing::info!("  [{}/{}]: {}", ordinal, total, name);
            }
            ProgressEvent::Completed { description } => {
                tracing::info!("Done {}.", description.to_lowercase());
            }
            ProgressEvent::Halted { name } => {
                tracing::info!("Stopped after '{}'", name);
            }
            ProgressEvent::Failed { name, error } => {
                tracing::error!("Step '{}' failed: {}", name, error);
            }
        }
    }
}

/// Keeps every event, for inspection after a run.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Names of the steps that were started, in order.
    pub fn started_steps(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Running { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }
}

impl ProgressHandler for RecordingProgress {
    fn handle_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl<P: ProgressHandler + ?Sized> ProgressHandler for &P {
    fn handle_event(&self, event: ProgressEvent) {
        (**self).handle_event(event);
    }
}

/// Runs step lists, reporting to a progress handler.
#[derive(Debug, Default)]
pub struct StepSequencer<P> {
    progress: P,
}

impl<P: ProgressHandler> StepSequencer<P> {
    /// Create a sequencer reporting to `progress`.
    pub fn new(progress: P) -> Self {
        Self { progress }
    }

    /// The progress handler.
    pub fn progress(&self) -> &P {
        &self.progress
    }

    /// Execute `steps` in order.
    ///
    /// # Errors
    ///
    /// The first failing step ends the run with
    /// [`InstallError::StepFailed`] naming the step.
    pub async fn run<A, R>(
        &self,
        steps: &[Step<A>],
        description: &str,
        estimated_cost: u32,
        runner: &mut R,
    ) -> Result<SequenceOutcome>
    where
        A: Send + Sync,
        R: StepRunner<A> + ?Sized,
    {
        self.progress.handle_event(ProgressEvent::Starting {
            description: description.to_string(),
            estimated_cost,
        });

        let total = steps.len();
        for step in steps {
            self.progress.handle_event(ProgressEvent::Running {
                ordinal: step.ordinal,
                total,
                name: step.name.clone(),
            });

            match runner.run_step(&step.action).await {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Halt) => {
                    self.progress.handle_event(ProgressEvent::Halted {
                        name: step.name.clone(),
                    });
                    return Ok(SequenceOutcome::Halted {
                        step: step.name.clone(),
                    });
                }
                Err(e) => {
                    self.progress.handle_event(ProgressEvent::Failed {
                        name: step.name.clone(),
                        error: e.to_string(),
                    });
                    return Err(InstallError::step_failed(step.name.clone(), e));
                }
            }
        }

        self.progress.handle_event(ProgressEvent::Completed {
            description: description.to_string(),
        });
        Ok(SequenceOutcome::Completed)
    }
}
