// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! External program steps.
//!
//! The program is started as `program [args]` with piped stdio. Input
//! documents are framed onto stdin, output documents are decoded from stdout
//! and stderr is collected in the background so a chatty step never blocks on
//! a full pipe. Node parameters and id are passed through the environment.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::contract::{describe_program, StepContract};
use crate::document::{Document, DocumentCodec};
use crate::errors::{StepContractViolation, StepError};
use crate::traits::{DocumentReader, DocumentWriter, Step, StepControl, StepExecution};

/// Environment variable carrying the node parameters as a JSON object.
pub const PARAMS_ENV: &str = "GRIDPUB_PARAMS";
/// Environment variable carrying the node id.
pub const NODE_ID_ENV: &str = "GRIDPUB_NODE_ID";

/// Upper bound on waiting for stderr to close once the process is gone.
const STDERR_COLLECT_LIMIT: Duration = Duration::from_millis(500);

pub struct ProcessStep {
    program: PathBuf,
    args: Vec<String>,
    contract: StepContract,
}

impl ProcessStep {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, contract: StepContract) -> Self {
        Self {
            program: program.into(),
            args,
            contract,
        }
    }

    /// Run the program's describe invocation and wrap the resulting contract.
    pub async fn discover(
        program: &Path,
        args: &[String],
        timeout: Duration,
    ) -> Result<Self, StepContractViolation> {
        let contract = describe_program(program, args, timeout).await?;
        Ok(Self::new(program, args.to_vec(), contract))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl Step for ProcessStep {
    fn contract(&self) -> &StepContract {
        &self.contract
    }

    async fn start(&self, node_id: &str, params: &Map<String, Value>) -> Result<StepExecution, StepError> {
        let params_json =
            serde_json::to_string(params).map_err(|e| StepError::Spawn(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(PARAMS_ENV, params_json)
            .env(NODE_ID_ENV, node_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StepError::Spawn(format!("{}: {}", self.program.display(), e)))?;

        let missing = |pipe: &str| StepError::Spawn(format!("{} was not captured", pipe));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        Ok(StepExecution {
            writer: Box::new(ProcessWriter {
                framed: Some(FramedWrite::new(stdin, DocumentCodec::new())),
            }),
            reader: Box::new(ProcessReader {
                framed: FramedRead::new(stdout, DocumentCodec::new()),
            }),
            control: Box::new(ProcessControl {
                child,
                stderr: Some(tokio::spawn(collect_stderr(stderr))),
                diagnostics: None,
            }),
        })
    }
}

async fn collect_stderr(mut stderr: ChildStderr) -> Vec<u8> {
    let mut buf = Vec::new();
    // A read error only truncates the diagnostics.
    let _ = stderr.read_to_end(&mut buf).await;
    buf
}

struct ProcessWriter {
    framed: Option<FramedWrite<ChildStdin, DocumentCodec>>,
}

#[async_trait]
impl DocumentWriter for ProcessWriter {
    async fn write(&mut self, document: Document) -> Result<(), StepError> {
        match self.framed.as_mut() {
            Some(framed) => framed.send(document).await,
            None => Err(StepError::Io("input already closed".to_string())),
        }
    }

    async fn close(&mut self) -> Result<(), StepError> {
        let Some(mut framed) = self.framed.take() else {
            return Ok(());
        };
        let flushed = framed.close().await;
        // Dropping the pipe is what the program sees as end of input.
        drop(framed);
        flushed
    }
}

struct ProcessReader {
    framed: FramedRead<ChildStdout, DocumentCodec>,
}

#[async_trait]
impl DocumentReader for ProcessReader {
    async fn next(&mut self) -> Option<Result<Document, StepError>> {
        self.framed.next().await
    }
}

struct ProcessControl {
    child: Child,
    stderr: Option<JoinHandle<Vec<u8>>>,
    diagnostics: Option<String>,
}

#[async_trait]
impl StepControl for ProcessControl {
    async fn try_wait(&mut self) -> Option<Result<(), StepError>> {
        match self.child.try_wait() {
            Ok(None) => None,
            Ok(Some(status)) if status.success() => Some(Ok(())),
            Ok(Some(status)) => Some(Err(StepError::NonZeroExit {
                status: status.to_string(),
            })),
            Err(e) => Some(Err(e.into())),
        }
    }

    async fn kill(&mut self) {
        // Already-exited children report an error here; nothing left to reclaim.
        let _ = self.child.kill().await;
    }

    async fn diagnostics(&mut self) -> Option<String> {
        if let Some(handle) = self.stderr.take() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(STDERR_COLLECT_LIMIT, handle).await {
                Ok(Ok(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes).trim().to_string();
                    if !text.is_empty() {
                        self.diagnostics = Some(text);
                    }
                }
                Ok(Err(_)) => {}
                // A grandchild may still hold the pipe open.
                Err(_) => abort.abort(),
            }
        }
        self.diagnostics.clone()
    }
}
