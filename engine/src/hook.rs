//! Stop-hook protocol
//!
//! One-shot mode that attaches to an external agent's stop attempt: read a
//! single JSON request from stdin, run one scoring pass plus a plateau
//! check in the request's working directory, and answer with an approve or
//! block decision on stdout. `block` asks the agent to keep going, with the
//! worst metric's feedback as the reason.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{EngineError, EngineResult};
use crate::preset;
use crate::score::Scorer;
use crate::state_file::{self, StateFile};

#[derive(Debug, Clone, Deserialize)]
pub struct StopHookRequest {
    pub session_id: String,
    #[serde(default)]
    pub transcript_path: Option<String>,
    pub cwd: PathBuf,
    pub hook_event_name: String,
    #[serde(default)]
    pub stop_hook_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopHookResponse {
    pub decision: Decision,
    pub reason: String,
}

/// Run one scoring pass and decide whether the agent may stop.
///
/// Approves when the target is reached, when the recorded stall streak has
/// hit the plateau threshold, or when the hook is re-entered
/// (`stop_hook_active`) to avoid blocking loops.
pub async fn evaluate_stop(request: &StopHookRequest) -> EngineResult<StopHookResponse> {
    if request.stop_hook_active {
        return Ok(StopHookResponse {
            decision: Decision::Approve,
            reason: "stop hook already active".to_string(),
        });
    }

    let preset = preset::load_preset(&request.cwd, false)?;
    let score = Scorer::new(&request.cwd).calculate(&preset.metrics).await;

    let mut state = state_file::load(&request.cwd)?.unwrap_or_default();
    let improved = match state.last_score() {
        Some(last) => score.total - last >= preset.min_improvement,
        None => true,
    };
    state.iteration += 1;
    state.scores.push(score.total);
    if improved {
        state.stalled_count = 0;
        state.last_improvement = state.iteration;
    } else {
        state.stalled_count += 1;
    }
    state.last_updated = Utc::now();
    state_file::save(&request.cwd, &state)?;

    tracing::info!(
        session_id = %request.session_id,
        hook_event = %request.hook_event_name,
        total = score.total,
        target = preset.target,
        stalled = state.stalled_count,
        "stop hook scored"
    );

    if score.total >= preset.target {
        return Ok(StopHookResponse {
            decision: Decision::Approve,
            reason: format!(
                "quality target reached: {} >= {}",
                score.total, preset.target
            ),
        });
    }
    if state.stalled_count >= preset.max_stalled {
        return Ok(StopHookResponse {
            decision: Decision::Approve,
            reason: format!(
                "plateau after {} attempts without improvement",
                state.stalled_count
            ),
        });
    }

    let reason = match score.find_worst() {
        Some(worst) => format!(
            "score {} is below target {}; worst metric is '{}' at {} (target {})",
            score.total, preset.target, worst.name, worst.score, worst.target
        ),
        None => format!("score {} is below target {}", score.total, preset.target),
    };
    Ok(StopHookResponse {
        decision: Decision::Block,
        reason,
    })
}

/// Stdio framing: one JSON request in, one JSON response out.
pub async fn run_stop_hook<R, W>(mut input: R, mut output: W) -> EngineResult<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut raw = String::new();
    input.read_to_string(&mut raw).await?;
    let request: StopHookRequest = serde_json::from_str(&raw)
        .map_err(|e| EngineError::config(format!("invalid stop-hook request: {e}")))?;

    let response = evaluate_stop(&request).await?;
    let json = serde_json::to_string(&response)?;
    output.write_all(json.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn request(cwd: PathBuf) -> StopHookRequest {
        StopHookRequest {
            session_id: "ext-1".into(),
            transcript_path: None,
            cwd,
            hook_event_name: "Stop".into(),
            stop_hook_active: false,
        }
    }

    fn write_preset(dir: &std::path::Path, metric_command: &str, target: f64) {
        std::fs::write(
            dir.join("polish.config.json"),
            format!(
                r#"{{"metrics":[{{"name":"tests","command":"{metric_command}"}}],"target":{target}}}"#
            ),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn approves_when_target_reached() {
        let dir = tempdir().unwrap();
        write_preset(dir.path(), "echo '10 pass'", 95.0);

        let response = evaluate_stop(&request(dir.path().to_path_buf())).await.unwrap();
        assert_eq!(response.decision, Decision::Approve);
        assert!(response.reason.contains("target reached"));
    }

    #[tokio::test]
    async fn blocks_below_target_with_worst_metric_feedback() {
        let dir = tempdir().unwrap();
        write_preset(dir.path(), "echo '4 pass, 1 fail'", 95.0);

        let response = evaluate_stop(&request(dir.path().to_path_buf())).await.unwrap();
        assert_eq!(response.decision, Decision::Block);
        assert!(response.reason.contains("tests"));

        let state = state_file::load(dir.path()).unwrap().unwrap();
        assert_eq!(state.scores, vec![80.0]);
    }

    #[tokio::test]
    async fn approves_after_plateau() {
        let dir = tempdir().unwrap();
        write_preset(dir.path(), "echo '4 pass, 1 fail'", 95.0);

        let req = request(dir.path().to_path_buf());
        // First pass establishes the baseline; following passes stall.
        for _ in 0..5 {
            let response = evaluate_stop(&req).await.unwrap();
            assert_eq!(response.decision, Decision::Block);
        }
        let response = evaluate_stop(&req).await.unwrap();
        assert_eq!(response.decision, Decision::Approve);
        assert!(response.reason.contains("plateau"));
    }

    #[tokio::test]
    async fn reentrant_hook_approves() {
        let dir = tempdir().unwrap();
        write_preset(dir.path(), "echo '0 pass, 5 fail'", 95.0);

        let mut req = request(dir.path().to_path_buf());
        req.stop_hook_active = true;
        let response = evaluate_stop(&req).await.unwrap();
        assert_eq!(response.decision, Decision::Approve);
    }

    #[tokio::test]
    async fn stdio_round_trip() {
        let dir = tempdir().unwrap();
        write_preset(dir.path(), "echo '10 pass'", 95.0);

        let input = serde_json::json!({
            "session_id": "ext-1",
            "transcript_path": "/tmp/t.jsonl",
            "cwd": dir.path(),
            "hook_event_name": "Stop"
        })
        .to_string();

        let mut output = Vec::new();
        run_stop_hook(input.as_bytes(), &mut output).await.unwrap();

        let response: StopHookResponse = serde_json::from_slice(&output).unwrap();
        assert_eq!(response.decision, Decision::Approve);
    }
}
