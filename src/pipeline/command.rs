use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::debug;

use crate::error::{HarvestError, Result};

/// One external tool call and the files it promises to leave behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    program: String,
    args: Vec<String>,
    produces: Vec<PathBuf>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            produces: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Declare a file that must exist once the tool exits successfully
    pub fn produces(mut self, path: impl Into<PathBuf>) -> Self {
        self.produces.push(path.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn outputs(&self) -> &[PathBuf] {
        &self.produces
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Executes tool invocations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> Result<()>;
}

/// Runs tools as child processes on the tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<()> {
        debug!("$ {}", invocation);

        let status = tokio::process::Command::new(invocation.program())
            .args(invocation.arguments())
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                HarvestError::processing(invocation.program(), format!("could not start: {}", e))
            })?;

        if !status.success() {
            return Err(HarvestError::processing(
                invocation.to_string(),
                format!("exited with {}", status),
            ));
        }

        for output in invocation.outputs() {
            if !tokio::fs::try_exists(output).await.unwrap_or(false) {
                return Err(HarvestError::processing(
                    invocation.to_string(),
                    format!("expected output {} was not produced", output.display()),
                ));
            }
        }

        Ok(())
    }
}
