//! Worker invocation for planning decisions.
//!
//! Each `Decision` becomes one auction-worker command line:
//!
//! ```text
//! <worker> <action> <tender_id> <worker_config> [--lot <lot_id>]
//!     [--with_api_version <version>] [--auction_info_from_db true]
//! ```
//!
//! The launch is retried until the worker exits successfully. A failing
//! launch blocks the bridge on that action; it is never dropped and never
//! surfaced as an error.

use std::collections::BTreeMap;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::config::OperatingMode;
use crate::error::{BridgeError, Result};
use crate::planner::Decision;
use crate::retry::{retry_until_success, RetryPolicy, Sleeper, ThreadSleeper};

/// Key of the worker config used for documents without a procurement method type.
pub const DEFAULT_METHOD_TYPE: &str = "default";

/// Everything needed to build a worker command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub executable: String,
    pub config: String,
    /// Worker config per procurement method type. Types not listed here use
    /// `config`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configs: BTreeMap<String, String>,
    pub api_version: Option<String>,
    pub mode: OperatingMode,
}

impl WorkerSettings {
    /// The worker config for a document of the given procurement method type.
    ///
    /// A missing or empty type is looked up as `"default"`.
    pub fn config_for(&self, procurement_method_type: Option<&str>) -> &str {
        let key = procurement_method_type
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_METHOD_TYPE);
        self.configs
            .get(key)
            .map(String::as_str)
            .unwrap_or(&self.config)
    }
}

/// Build the worker argument list for `decision` on a document of the given
/// procurement method type. The first element is the executable.
pub fn worker_params(
    decision: &Decision,
    procurement_method_type: Option<&str>,
    settings: &WorkerSettings,
) -> Vec<String> {
    let mut params = vec![
        settings.executable.clone(),
        decision.action.as_str().to_string(),
        decision.tender_id.clone(),
        settings.config_for(procurement_method_type).to_string(),
    ];
    if !decision.lot_id.is_empty() {
        params.extend(["--lot".to_string(), decision.lot_id.clone()]);
    }
    if let Some(version) = &settings.api_version {
        params.extend(["--with_api_version".to_string(), version.clone()]);
    }
    if settings.mode == OperatingMode::Test {
        params.extend(["--auction_info_from_db".to_string(), "true".to_string()]);
    }
    params
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// Runs a worker command line to completion.
pub trait Launcher {
    /// `Ok` only if the process ran and exited successfully.
    fn launch(&self, params: &[String]) -> Result<()>;
}

impl<T: Launcher + ?Sized> Launcher for &T {
    fn launch(&self, params: &[String]) -> Result<()> {
        (**self).launch(params)
    }
}

/// Launches the worker as a child process and waits for it.
///
/// stdout and stderr flow through so worker log lines appear alongside the
/// bridge's own.
pub struct CommandLauncher;

impl Launcher for CommandLauncher {
    fn launch(&self, params: &[String]) -> Result<()> {
        let (program, args) = params
            .split_first()
            .ok_or_else(|| BridgeError::WorkerFailed("empty command line".into()))?;

        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| BridgeError::WorkerFailed(format!("failed to spawn '{program}': {e}")))?;

        if status.success() {
            return Ok(());
        }
        let msg = match status.code() {
            Some(code) => format!("'{program}' exited with code {code}"),
            None => format!("'{program}' terminated by signal"),
        };
        Err(BridgeError::WorkerFailed(msg))
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// What a completed dispatch did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub params: Vec<String>,
    pub attempts: u32,
}

pub struct Dispatcher<L> {
    settings: WorkerSettings,
    launcher: L,
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl<L: Launcher> Dispatcher<L> {
    pub fn new(settings: WorkerSettings, launcher: L, policy: RetryPolicy) -> Self {
        Self {
            settings,
            launcher,
            policy,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    /// Replace the sleeper used between launch attempts.
    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Launch the worker for `decision`, retrying until it succeeds.
    pub fn dispatch(
        &self,
        decision: &Decision,
        procurement_method_type: Option<&str>,
    ) -> DispatchReport {
        let params = worker_params(decision, procurement_method_type, &self.settings);
        tracing::info!(
            action = %decision.action,
            tender_id = %decision.tender_id,
            lot_id = %decision.lot_id,
            procurement_method_type = procurement_method_type.unwrap_or(DEFAULT_METHOD_TYPE),
            command = ?params,
            "launching auction worker"
        );

        let ((), attempts) = retry_until_success(&self.policy, self.sleeper.as_ref(), |_| {
            self.launcher.launch(&params)
        });

        tracing::info!(
            action = %decision.action,
            auction_id = %decision.auction_id(),
            attempts,
            "auction worker finished"
        );
        DispatchReport { params, attempts }
    }
}
