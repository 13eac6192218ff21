//! Shells out to the system `git` to perform the actual clone/fetch, under a
//! hard deadline, streaming progress. Grounded on
//! `domains/git/clone.rs::clone_repository` in the teacher, generalized from
//! a synchronous `std::process::Command` to an async, cancellable one so it
//! composes with the scheduler's worker pool.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: String,
    pub percent: u8,
}

#[derive(Debug, Clone)]
pub enum CloneError {
    Timeout { elapsed: Duration },
    Cancelled,
    Failed { message: String },
    Io { message: String },
}

impl fmt::Display for CloneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloneError::Timeout { elapsed } => {
                write!(f, "timed out after {:.1}s", elapsed.as_secs_f64())
            }
            CloneError::Cancelled => write!(f, "operation cancelled"),
            CloneError::Failed { message } => write!(f, "{message}"),
            CloneError::Io { message } => write!(f, "I/O error: {message}"),
        }
    }
}

impl std::error::Error for CloneError {}

/// Clones `canonical_url` into `dest_path` as a bare repository, invoking
/// `on_progress` for every parseable `phase: NN%` fragment on the way.
///
/// `clone --bare --progress -- <url> <dest>`: the explicit `--` guards
/// against option injection even though the URL has already been through
/// the normalizer's own `OptionLike` check.
pub async fn clone<F>(
    cancel: &CancellationToken,
    canonical_url: &str,
    dest_path: &Path,
    clone_timeout: Duration,
    mut on_progress: F,
) -> Result<(), CloneError>
where
    F: FnMut(ProgressEvent) + Send,
{
    let dest_str = dest_path.to_str().ok_or_else(|| CloneError::Failed {
        message: format!(
            "destination path is not valid UTF-8: {}",
            dest_path.display()
        ),
    })?;

    let child = spawn_git(
        &["clone", "--bare", "--progress", "--", canonical_url, dest_str],
        None,
    )?;

    run_with_deadline(cancel, clone_timeout, child, &mut on_progress).await
}

/// Runs `fetch --prune --quiet` inside an existing bare repository. No
/// progress is reported; output is retained only for the failure message.
pub async fn fetch(
    cancel: &CancellationToken,
    repo_path: &Path,
    fetch_timeout: Duration,
) -> Result<(), CloneError> {
    let path_str = repo_path.to_str().ok_or_else(|| CloneError::Failed {
        message: format!("repo path is not valid UTF-8: {}", repo_path.display()),
    })?;

    let child = spawn_git(
        &["-C", path_str, "fetch", "--prune", "--quiet"],
        None,
    )?;

    run_with_deadline(cancel, fetch_timeout, child, &mut |_| {}).await
}

fn spawn_git(args: &[&str], cwd: Option<&Path>) -> Result<tokio::process::Child, CloneError> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_ASKPASS", "true")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    cmd.spawn().map_err(|e| CloneError::Io {
        message: format!("failed to spawn git: {e}"),
    })
}

async fn run_with_deadline<F>(
    cancel: &CancellationToken,
    deadline: Duration,
    mut child: tokio::process::Child,
    on_progress: &mut F,
) -> Result<(), CloneError>
where
    F: FnMut(ProgressEvent) + Send,
{
    let stderr = child
        .stderr
        .take()
        .expect("child spawned with piped stderr");

    let work = async move {
        let raw_output = pump_stderr(stderr, on_progress).await?;
        let status = child.wait().await.map_err(|e| CloneError::Io {
            message: e.to_string(),
        })?;
        Ok::<_, CloneError>((status, raw_output))
    };

    tokio::select! {
        outcome = timeout(deadline, work) => {
            match outcome {
                Ok(Ok((status, raw_output))) => {
                    if status.success() {
                        Ok(())
                    } else {
                        Err(CloneError::Failed {
                            message: trim_diagnostic(&raw_output),
                        })
                    }
                }
                Ok(Err(e)) => Err(e),
                Err(_elapsed) => Err(CloneError::Timeout { elapsed: deadline }),
            }
        }
        () = cancel.cancelled() => Err(CloneError::Cancelled),
    }
    // `work` owns `child`; dropping it on the losing branch above drops the
    // `Child` handle, and `kill_on_drop(true)` reaps the subprocess.
}

/// Consumes the subprocess's diagnostic stream as raw bytes, splitting on
/// both `\n` and `\r` (git uses `\r` for in-place progress updates within
/// one logical line), per spec §4.2.
async fn pump_stderr<F>(
    mut stderr: tokio::process::ChildStderr,
    on_progress: &mut F,
) -> Result<Vec<u8>, CloneError>
where
    F: FnMut(ProgressEvent) + Send,
{
    let mut raw_output = Vec::new();
    let mut pending = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = stderr.read(&mut buf).await.map_err(|e| CloneError::Io {
            message: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        raw_output.extend_from_slice(&buf[..n]);
        pending.extend_from_slice(&buf[..n]);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n' || b == b'\r') {
            let fragment: Vec<u8> = pending.drain(..=pos).collect();
            emit_if_progress(&fragment[..fragment.len() - 1], on_progress);
        }
    }
    if !pending.is_empty() {
        emit_if_progress(&pending, on_progress);
    }
    Ok(raw_output)
}

fn emit_if_progress<F>(fragment: &[u8], on_progress: &mut F)
where
    F: FnMut(ProgressEvent) + Send,
{
    let text = String::from_utf8_lossy(fragment);
    if let Some(event) = parse_progress_fragment(&text) {
        on_progress(event);
    }
}

/// Matches `^(.+?):\s+(\d+)%`: a non-empty phase, a colon, whitespace, then
/// a percentage. Non-matching fragments are ignored for progress purposes.
fn parse_progress_fragment(fragment: &str) -> Option<ProgressEvent> {
    let fragment = fragment.trim();
    let (phase, rest) = fragment.split_once(':')?;
    let phase = phase.trim();
    if phase.is_empty() {
        return None;
    }
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    let rest = rest.trim_start();
    if rest.is_empty() || !rest.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let after_digits = &rest[digits.len()..];
    if !after_digits.starts_with('%') {
        return None;
    }
    let percent: u32 = digits.parse().ok()?;
    Some(ProgressEvent {
        phase: phase.to_string(),
        percent: percent.min(100) as u8,
    })
}

fn trim_diagnostic(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}
