// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Self-description of external step programs.
//!
//! A step program invoked with [`DESCRIBE_ARG`] must print its contract as a JSON
//! object on standard output and exit zero:
//!
//! ```json
//! {"name": "pbs_jobs", "description": "...", "time_out": 30,
//!  "requires": ["pbs.qstat"], "produces": ["glue2.activities.json"],
//!  "params": {"site": "site name"}}
//! ```
//!
//! `name`, `time_out`, `requires` and `produces` are mandatory. Anything short
//! of that is a [`StepContractViolation`], raised before a workflow is built.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::contract::StepContract;
use crate::errors::StepContractViolation;
use crate::observability::messages::step::ContractDiscovered;
use crate::observability::messages::StructuredLog;

/// Reserved argument that asks a step program to describe itself.
pub const DESCRIBE_ARG: &str = "--describe";

#[derive(Debug, Deserialize)]
struct RawContract {
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    time_out: Option<u64>,
    requires: Option<BTreeSet<String>>,
    produces: Option<BTreeSet<String>>,
    #[serde(default)]
    params: Option<BTreeMap<String, String>>,
}

/// Runs `program --describe` and parses its contract.
pub async fn describe_program(
    program: &Path,
    args: &[String],
    timeout: Duration,
) -> Result<StepContract, StepContractViolation> {
    let program_name = program.display().to_string();

    let child = Command::new(program)
        .args(args)
        .arg(DESCRIBE_ARG)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| StepContractViolation::Spawn {
            program: program_name.clone(),
            source,
        })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| StepContractViolation::Timeout {
            program: program_name.clone(),
            timeout,
        })?
        .map_err(|source| StepContractViolation::Spawn {
            program: program_name.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(StepContractViolation::NonZeroExit {
            program: program_name,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let contract = parse_description(&program_name, &output.stdout)?;
    ContractDiscovered {
        program: &program_name,
        contract: &contract,
    }
    .log();
    Ok(contract)
}

/// Parses a self-description, checking that every mandatory field is present.
pub fn parse_description(program: &str, raw: &[u8]) -> Result<StepContract, StepContractViolation> {
    let raw: RawContract =
        serde_json::from_slice(raw).map_err(|e| StepContractViolation::Malformed {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    let missing = |field: &'static str| StepContractViolation::MissingField {
        program: program.to_string(),
        field,
    };

    let name = raw.name.filter(|n| !n.trim().is_empty()).ok_or_else(|| missing("name"))?;
    Ok(StepContract {
        name,
        description: raw.description.unwrap_or_default(),
        time_out: raw.time_out.ok_or_else(|| missing("time_out"))?,
        required_types: raw.requires.ok_or_else(|| missing("requires"))?,
        produced_types: raw.produces.ok_or_else(|| missing("produces"))?,
        accepted_params: raw.params.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::stub::write_script;

    #[test]
    fn test_parse_complete_description() {
        let raw = br#"{"name":"pbs_jobs","description":"jobs","time_out":30,
            "requires":["pbs.qstat"],"produces":["glue2.activities.json"],
            "params":{"site":"site name"}}"#;
        let contract = parse_description("pbs_jobs", raw).unwrap();
        assert_eq!(contract.name, "pbs_jobs");
        assert_eq!(contract.time_out, 30);
        assert!(contract.required_types.contains("pbs.qstat"));
        assert!(contract.produced_types.contains("glue2.activities.json"));
        assert_eq!(contract.accepted_params["site"], "site name");
    }

    #[test]
    fn test_missing_produced_types_is_a_violation() {
        let raw = br#"{"name":"pbs_jobs","time_out":30,"requires":[]}"#;
        match parse_description("pbs_jobs", raw) {
            Err(StepContractViolation::MissingField { field, .. }) => assert_eq!(field, "produces"),
            other => panic!("expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            parse_description("x", b"usage: x [options]"),
            Err(StepContractViolation::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_describe_program_runs_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            &dir,
            "describe_ok.sh",
            r#"[ "$1" = "--describe" ] || exit 3
echo '{"name":"uptime","time_out":5,"requires":[],"produces":["t1"]}'"#,
        );

        let contract = describe_program(&script, &[], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(contract.name, "uptime");
        assert!(contract.is_root());
    }

    #[tokio::test]
    async fn test_describe_program_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(&dir, "describe_fail.sh", "echo broken >&2\nexit 2");

        let err = describe_program(&script, &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            StepContractViolation::NonZeroExit { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_describe_program_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(&dir, "describe_hang.sh", "sleep 30");

        let err = describe_program(&script, &[], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, StepContractViolation::Timeout { .. }));
    }
}
