//! Provider clients backed by the `aws` and `az` command-line tools.
//!
//! Each call runs the tool with `--output json` and parses stdout. The
//! tools own credential discovery (profiles, SSO, `az login`), so skyscan
//! never touches secrets directly.
//!
//! Handles gracefully:
//! - tool not installed
//! - not logged in / expired credentials
//! - permission denied on a single API
//! - a call that hangs past the scope deadline (the process is killed)

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{trace, warn};

use super::provider::{ApiCall, Binding, CloudApi, Connector};
use crate::error::{ScopeInitError, ServiceCallError};
use crate::platform;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Flavor {
    Aws,
    Azure,
}

/// Opens [`CliApi`] clients bound to a profile/subscription and scope.
#[derive(Debug, Clone)]
pub struct CliConnector {
    program: String,
    flavor: Flavor,
    profile: Option<String>,
}

impl CliConnector {
    /// `profile` is passed as `--profile` to every call when set.
    pub fn aws(program: impl Into<String>, profile: Option<String>) -> Self {
        CliConnector {
            program: program.into(),
            flavor: Flavor::Aws,
            profile,
        }
    }

    pub fn azure(program: impl Into<String>) -> Self {
        CliConnector {
            program: program.into(),
            flavor: Flavor::Azure,
            profile: None,
        }
    }

    fn binding_args(&self, binding: &Binding<'_>) -> Result<Vec<String>, ScopeInitError> {
        let mut args = Vec::new();

        if let Some(scope) = binding.scope {
            if !is_valid_scope(scope.as_str()) {
                return Err(ScopeInitError::InvalidScope(scope.to_string()));
            }
        }

        match self.flavor {
            Flavor::Aws => {
                if let Some(profile) = &self.profile {
                    args.extend(["--profile".to_string(), profile.clone()]);
                }
                if let Some(scope) = binding.scope {
                    args.extend(["--region".to_string(), scope.to_string()]);
                }
            }
            Flavor::Azure => {
                if let Some(subscription) = binding.account {
                    args.extend(["--subscription".to_string(), subscription.to_string()]);
                }
                if let Some(scope) = binding.scope {
                    args.extend(["--resource-group".to_string(), scope.to_string()]);
                }
            }
        }

        Ok(args)
    }
}

impl Connector for CliConnector {
    fn probe(&self) -> Result<(), ScopeInitError> {
        let version_arg = match self.flavor {
            Flavor::Aws => "--version",
            Flavor::Azure => "version",
        };

        if platform::cli_available(&self.program, version_arg) {
            Ok(())
        } else {
            Err(ScopeInitError::ToolUnavailable {
                program: self.program.clone(),
            })
        }
    }

    fn connect(&self, binding: &Binding<'_>) -> Result<Arc<dyn CloudApi>, ScopeInitError> {
        Ok(Arc::new(CliApi {
            program: self.program.clone(),
            binding: self.binding_args(binding)?,
            deadline: binding.deadline,
        }))
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One bound client. Stateless between calls.
#[derive(Debug, Clone)]
pub struct CliApi {
    program: String,
    binding: Vec<String>,
    deadline: Option<Instant>,
}

impl CliApi {
    fn timed_out(&self, call: &ApiCall) -> ServiceCallError {
        ServiceCallError::TimedOut {
            program: self.program.clone(),
            operation: call.operation(),
        }
    }

    fn spawn_error(&self, source: std::io::Error) -> ServiceCallError {
        ServiceCallError::Spawn {
            program: self.program.clone(),
            source,
        }
    }

    /// Waits for `child`, killing it once the deadline passes.
    fn wait(&self, child: &mut Child, call: &ApiCall) -> Result<ExitStatus, ServiceCallError> {
        let Some(deadline) = self.deadline else {
            return child.wait().map_err(|e| self.spawn_error(e));
        };

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        warn!(program = %self.program, operation = %call.operation(), "killed provider command at scope deadline");
                        return Err(self.timed_out(call));
                    }
                    thread::sleep(POLL_INTERVAL.min(deadline - now));
                }
                Err(e) => return Err(self.spawn_error(e)),
            }
        }
    }
}

/// Reads a pipe to the end on its own thread so a chatty child never
/// blocks on a full pipe while we poll it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    reader.join().unwrap_or_default()
}

impl CloudApi for CliApi {
    fn call(&self, call: &ApiCall) -> Result<Value, ServiceCallError> {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(self.timed_out(call));
        }

        trace!(program = %self.program, operation = %call.operation(), "running provider command");

        let mut child = Command::new(&self.program)
            .args(call.command)
            .args(&call.args)
            .args(&self.binding)
            .args(["--output", "json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        // on timeout the readers are left to finish on their own
        let status = self.wait(&mut child, call)?;
        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(classify_failure(&self.program, &stderr));
        }

        let stdout = String::from_utf8_lossy(&stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&stdout)
            .map_err(|e| ServiceCallError::Malformed(format!("{}: {e}", call.operation())))
    }
}

fn classify_failure(program: &str, stderr: &str) -> ServiceCallError {
    // check for common error patterns
    if stderr.contains("Unable to locate credentials")
        || stderr.contains("ExpiredToken")
        || stderr.contains("az login")
    {
        let hint = if program.ends_with("az") {
            "run 'az login'"
        } else {
            "configure credentials or run 'aws sso login'"
        };
        return ServiceCallError::Unauthenticated {
            program: program.to_string(),
            hint: hint.to_string(),
        };
    }

    if stderr.contains("AccessDenied")
        || stderr.contains("UnauthorizedOperation")
        || stderr.contains("AuthorizationFailed")
    {
        return ServiceCallError::AccessDenied {
            program: program.to_string(),
            detail: last_line(stderr),
        };
    }

    ServiceCallError::CommandFailed {
        program: program.to_string(),
        stderr: last_line(stderr),
    }
}

fn last_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no error output")
        .to_string()
}

/// Region and resource-group names only. Anything else could be read as a
/// flag by the tool. Resource groups may use non-ASCII letters.
fn is_valid_scope(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= 90
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')'))
}
