//! Lab network provisioning
//!
//! Drives a virtualized router instance from "host reachable" to "guest bridged,
//! identified and running its configuration agent". Every remote step goes
//! through the `SessionTransport` boundary, every local step through
//! `ProcessRunner`, so the whole workflow runs against in-memory fakes in tests.

pub mod bootstrap;
pub mod config;
pub mod console;
pub mod error;
pub mod facts;
pub mod poller;
pub mod process;
pub mod progress;
pub mod remote_fs;
pub mod transport;

pub use bootstrap::{
    ProvisioningWorkflow, Stage, TapOutcome, TapState, WorkflowContext, WorkflowInputs,
};
pub use config::{NetstackConfig, TrustMode};
pub use console::{ConsoleDriver, LineDiscipline, LoginDialogue, Readiness};
pub use error::{ProvisionError, Result};
pub use facts::{ExtractionRule, FactRules, InterfaceHandle, MacAddress};
pub use poller::{poll_until, poll_until_ready, RetryPolicy};
pub use process::{ProcessOutput, ProcessRunner, SystemProcessRunner};
pub use progress::{ChannelProgressReporter, ProgressReporter, StageProgress, TracingProgressReporter};
pub use remote_fs::{EnsureOutcome, RemoteFs, RemoteKind};
pub use transport::{
    Credentials, Endpoint, FileKind, Session, SessionMode, SessionTransport, SshTransport,
};
