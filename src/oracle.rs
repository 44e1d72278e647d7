//! Scoring oracle boundary.
//!
//! An oracle maps a user x item interaction matrix to a same-shaped matrix of
//! predicted affinities. [`score`] wraps every exchange with the empty-input
//! shortcut, the time bound and the shape check, so adapters only deal with
//! transport.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::OracleError;
use crate::matrix::Matrix;

#[async_trait]
pub trait ScoringOracle: Send + Sync {
    fn name(&self) -> &str;

    async fn predict(&self, input: &Matrix) -> Result<Matrix, OracleError>;
}

pub async fn score(
    oracle: &dyn ScoringOracle,
    input: &Matrix,
    bound: Duration,
) -> Result<Matrix, OracleError> {
    let (rows, columns) = input.shape();
    if input.is_empty() {
        debug!(oracle = oracle.name(), rows, columns, "nothing to score");
        return Ok(Matrix::zeros(rows, columns));
    }

    let output = tokio::time::timeout(bound, oracle.predict(input))
        .await
        .map_err(|_| OracleError::Timeout(bound))??;

    if output.shape() != input.shape() {
        let (found_rows, found_columns) = output.shape();
        return Err(OracleError::ShapeMismatch {
            rows,
            columns,
            found: format!("{found_rows}x{found_columns}"),
        });
    }

    Ok(output)
}

/// Runs an external program per exchange: the matrix goes to stdin as one
/// line of JSON, the predicted matrix is read back from stdout.
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
}

impl CommandOracle {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl ScoringOracle for CommandOracle {
    fn name(&self) -> &str {
        &self.program
    }

    async fn predict(&self, input: &Matrix) -> Result<Matrix, OracleError> {
        let mut payload = serde_json::to_vec(input.rows())?;
        payload.push(b'\n');

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(OracleError::Unavailable)?;

        // A program that exits without reading stdin closes the pipe early;
        // its exit status is the more useful error.
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(err) => return Err(OracleError::Unavailable(err)),
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(OracleError::Unavailable)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            warn!(program = %self.program, status = %output.status, "oracle process failed");
            return Err(OracleError::Exited {
                status: output.status.to_string(),
                stderr: tail,
            });
        }

        parse_output(&output.stdout, input.shape())
    }
}

fn parse_output(stdout: &[u8], (rows, columns): (usize, usize)) -> Result<Matrix, OracleError> {
    let parsed: Vec<Vec<f64>> = serde_json::from_slice(stdout.trim_ascii())?;
    Matrix::from_rows(parsed).ok_or_else(|| OracleError::ShapeMismatch {
        rows,
        columns,
        found: "ragged rows".to_string(),
    })
}
