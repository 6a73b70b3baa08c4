//! Effect evaluation in a child process
//!
//! Python snippets run under `python3`, shell snippets under `sh`. The
//! collected data is passed as JSON on stdin and, for shell code, also as
//! `DATA_<NAME>` environment variables. The result is the trimmed stdout.

use super::traits::Evaluator;
use crate::memory::DataRecord;
use crate::spec::Execute;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("file {0} not found in load path")]
    NotFound(String),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("evaluation failed (exit code {code}): {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Python,
    Shell,
}

impl Language {
    fn parse(name: &str) -> Result<Self, EvalError> {
        match name.to_lowercase().as_str() {
            "python" | "python3" => Ok(Language::Python),
            "shell" | "sh" | "bash" => Ok(Language::Shell),
            other => Err(EvalError::UnsupportedLanguage(other.to_string())),
        }
    }
}

pub struct ProcessEvaluator {
    load_path: Vec<PathBuf>,
    python: String,
    timeout: Duration,
}

impl ProcessEvaluator {
    pub fn new(load_path: Vec<PathBuf>) -> Self {
        Self {
            load_path,
            python: "python3".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn find_file(&self, name: &str) -> Result<PathBuf, EvalError> {
        self.load_path
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| EvalError::NotFound(name.to_string()))
    }

    /// Program text for python: inline code becomes the body of a function
    /// taking the data fields; a `.py` file must define `main`.
    fn python_program(&self, code: &str, data: &DataRecord) -> Result<String, EvalError> {
        let params = data.keys().cloned().collect::<Vec<_>>().join(", ");
        let prelude = "import json as __json, sys as __sys\n__data = __json.load(__sys.stdin)\n";
        let epilogue = "print('' if __result is None else __result)\n";

        if code.trim_end().ends_with(".py") {
            let path = self.find_file(code.trim())?;
            let source = std::fs::read_to_string(&path).map_err(|source| EvalError::Spawn {
                program: path.display().to_string(),
                source,
            })?;
            return Ok(format!("{source}\n{prelude}__result = main(**__data)\n{epilogue}"));
        }

        let body: String = code.lines().map(|line| format!("    {line}\n")).collect();
        Ok(format!(
            "{prelude}def __eval({params}):\n{body}    return None\n__result = __eval(**__data)\n{epilogue}"
        ))
    }

    fn shell_args(&self, code: &str) -> Result<Vec<String>, EvalError> {
        if code.trim_end().ends_with(".sh") {
            let path = self.find_file(code.trim())?;
            Ok(vec![path.display().to_string()])
        } else {
            Ok(vec!["-c".to_string(), code.to_string()])
        }
    }

    async fn run(
        &self,
        program: &str,
        args: &[String],
        data: &DataRecord,
    ) -> Result<String, EvalError> {
        let spawn_err = |source| EvalError::Spawn {
            program: program.to_string(),
            source,
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in data {
            cmd.env(format!("DATA_{}", name.to_uppercase()), plain_text(value));
        }

        let mut child = cmd.spawn().map_err(spawn_err)?;
        let stdin = child.stdin.take();
        let payload = Value::Object(data.clone()).to_string();
        let feed = tokio::spawn(async move {
            match stdin {
                Some(mut stdin) => write_payload(&mut stdin, payload.as_bytes()).await,
                None => Ok(()),
            }
        });

        let finished = async {
            let output = child.wait_with_output().await.map_err(spawn_err)?;
            match feed.await {
                Ok(result) => result.map_err(spawn_err)?,
                Err(join) => {
                    return Err(spawn_err(std::io::Error::other(join.to_string())));
                }
            }
            if output.status.success() {
                Ok::<_, EvalError>(String::from_utf8_lossy(&output.stdout).trim().to_string())
            } else {
                Err(EvalError::Failed {
                    code: output.status.code().unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                })
            }
        };

        tokio::select! {
            () = tokio::time::sleep(self.timeout) => Err(EvalError::Timeout(self.timeout)),
            result = finished => result,
        }
    }
}

/// Send the payload; a child that exits without reading stdin is fine
async fn write_payload<W>(stdin: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    match stdin.write_all(payload).await {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

#[async_trait]
impl Evaluator for ProcessEvaluator {
    async fn evaluate(&self, execute: &Execute, data: &DataRecord) -> Result<String, EvalError> {
        let language = Language::parse(&execute.language)?;
        tracing::debug!(language = ?language, "Evaluating effect");

        match language {
            Language::Python => {
                let program = self.python_program(&execute.code, data)?;
                self.run(&self.python, &["-c".to_string(), program], data)
                    .await
            }
            Language::Shell => {
                let args = self.shell_args(&execute.code)?;
                self.run("sh", &args, data).await
            }
        }
    }
}

/// Value as a user would write it: strings without quotes
pub fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
