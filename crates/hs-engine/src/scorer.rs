//! Scores candidates by running the image's trainer program.

use async_trait::async_trait;
use hs_search::{Evaluation, Params, Scorer, SearchRequest};
use hs_types::{HsError, HsResult};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

pub const FEATURES_PATH_ENV: &str = "HS_FEATURES_PATH";
pub const LABELS_PATH_ENV: &str = "HS_LABELS_PATH";
pub const PARAMS_ENV: &str = "HS_PARAMS";
pub const ESTIMATOR_ENV: &str = "HS_ESTIMATOR";
pub const SCORING_ENV: &str = "HS_SCORING";

/// Runs `program` once per candidate.
///
/// The dataset is written to temporary files once per fit and their paths
/// are passed in [`FEATURES_PATH_ENV`] and [`LABELS_PATH_ENV`]; the candidate
/// and the estimator configuration are passed as JSON in [`PARAMS_ENV`] and
/// [`ESTIMATOR_ENV`]. The last non-empty line of stdout must be
/// `{"score": <number>, "estimator": <any, optional>}`.
#[derive(Debug)]
pub struct CommandScorer {
    program: PathBuf,
    args: Vec<String>,
    staged: Mutex<Option<StagedDataset>>,
}

/// Dataset files shared by every candidate of a fit. Removed on drop.
#[derive(Debug)]
struct StagedDataset {
    _dir: TempDir,
    features: PathBuf,
    labels: PathBuf,
}

impl StagedDataset {
    async fn write(features: &[u8], labels: &[u8]) -> HsResult<Self> {
        let dir = tempfile::tempdir()?;
        let features_path = dir.path().join("features");
        let labels_path = dir.path().join("labels");
        tokio::fs::write(&features_path, features).await?;
        tokio::fs::write(&labels_path, labels).await?;
        debug!(
            "Staged {} feature and {} label bytes in {}",
            features.len(),
            labels.len(),
            dir.path().display()
        );

        Ok(Self {
            _dir: dir,
            features: features_path,
            labels: labels_path,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TrainerOutput {
    score: f64,
    #[serde(default)]
    estimator: Option<serde_json::Value>,
}

impl CommandScorer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            staged: Mutex::new(None),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Paths of the staged dataset, staging it first when no fit has
    /// prepared one.
    async fn dataset_paths(&self, features: &[u8], labels: &[u8]) -> HsResult<(PathBuf, PathBuf)> {
        let mut staged = self.staged.lock().await;
        let dataset = match staged.take() {
            Some(dataset) => dataset,
            None => StagedDataset::write(features, labels).await?,
        };
        let paths = (dataset.features.clone(), dataset.labels.clone());
        *staged = Some(dataset);
        Ok(paths)
    }

    fn parse_output(stdout: &[u8]) -> HsResult<Evaluation> {
        let text = String::from_utf8_lossy(stdout);
        let line = text
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| HsError::Worker("trainer printed nothing".into()))?;

        let output: TrainerOutput = serde_json::from_str(line.trim())
            .map_err(|e| HsError::Worker(format!("unreadable trainer output {line:?}: {e}")))?;
        Ok(Evaluation {
            score: output.score,
            estimator: output.estimator,
        })
    }
}

#[async_trait]
impl Scorer for CommandScorer {
    async fn prepare(&self, features: &[u8], labels: &[u8]) -> HsResult<()> {
        let dataset = StagedDataset::write(features, labels).await?;
        *self.staged.lock().await = Some(dataset);
        Ok(())
    }

    async fn score(
        &self,
        request: &SearchRequest,
        params: &Params,
        features: &[u8],
        labels: &[u8],
    ) -> HsResult<Evaluation> {
        let (features_path, labels_path) = self.dataset_paths(features, labels).await?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .env(FEATURES_PATH_ENV, &features_path)
            .env(LABELS_PATH_ENV, &labels_path)
            .env(PARAMS_ENV, serde_json::to_string(params)?)
            .env(ESTIMATOR_ENV, request.estimator.to_string())
            .env(SCORING_ENV, request.scoring.as_deref().unwrap_or_default())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                HsError::Worker(format!("cannot run trainer {}: {e}", self.program.display()))
            })?;

        if !output.status.success() {
            return Err(HsError::Worker(format!(
                "trainer {} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let evaluation = Self::parse_output(&output.stdout)?;
        debug!("Trainer scored {:?} at {}", params, evaluation.score);
        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hs_search::{ParamGrid, ScoredSearch, SearchFit, SearchSpecification};
    use hs_types::WorkerId;

    fn request() -> SearchRequest {
        SearchRequest::new(serde_json::json!({"model": "ridge"}), SearchSpecification::grid(ParamGrid::new()))
    }

    fn shell(script: &str) -> CommandScorer {
        CommandScorer::new("sh").with_args(vec!["-c".into(), script.into()])
    }

    #[test]
    fn parses_last_line() {
        let eval = CommandScorer::parse_output(b"epoch 1\n{\"score\": 0.75, \"estimator\": [1, 2]}\n\n").unwrap();
        assert_eq!(eval.score, 0.75);
        assert_eq!(eval.estimator, Some(serde_json::json!([1, 2])));

        assert!(CommandScorer::parse_output(b"").is_err());
        assert!(CommandScorer::parse_output(b"not json").is_err());
    }

    #[tokio::test]
    async fn trainer_sees_dataset_and_params() {
        let scorer = shell(
            r#"test "$HS_PARAMS" = '{"alpha":2}' || exit 7
echo "{\"score\": $(cat "$HS_FEATURES_PATH" | wc -c)}""#,
        );
        let mut params = Params::new();
        params.insert("alpha".into(), 2i64.into());

        let eval = scorer.score(&request(), &params, b"abcd", b"y").await.unwrap();
        assert_eq!(eval.score, 4.0);
        assert!(eval.estimator.is_none());
    }

    #[tokio::test]
    async fn dataset_is_staged_once_per_fit() {
        let log_dir = tempfile::tempdir().unwrap();
        let log = log_dir.path().join("paths");
        let scorer = shell(&format!(
            r#"echo "$HS_FEATURES_PATH" >> '{}'; echo '{{"score": 1}}'"#,
            log.display()
        ));
        let mut grid = ParamGrid::new();
        grid.insert("alpha".into(), vec![1i64.into(), 2i64.into(), 3i64.into()]);
        let req = SearchRequest::new(serde_json::Value::Null, SearchSpecification::grid(grid));

        let search = ScoredSearch::new(scorer);
        let result = search.fit(&req, WorkerId(0), b"abcd", b"y").await.unwrap();
        assert_eq!(result.candidates.len(), 3);

        let seen = std::fs::read_to_string(&log).unwrap();
        let paths: Vec<&str> = seen.lines().collect();
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|path| *path == paths[0]));

        let staged = search.scorer().staged.lock().await;
        let features = &staged.as_ref().unwrap().features;
        assert_eq!(paths[0], features.display().to_string());
        assert_eq!(std::fs::read(features).unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn preparing_a_new_fit_restages() {
        let scorer = shell(r#"echo "{\"score\": $(cat "$HS_FEATURES_PATH" | wc -c)}""#);
        scorer.prepare(b"abcd", b"y").await.unwrap();
        let first = scorer.score(&request(), &Params::new(), b"abcd", b"y").await.unwrap();
        scorer.prepare(b"ab", b"y").await.unwrap();
        let second = scorer.score(&request(), &Params::new(), b"ab", b"y").await.unwrap();
        assert_eq!((first.score, second.score), (4.0, 2.0));
    }

    #[tokio::test]
    async fn failing_trainer_is_a_worker_error() {
        let err = shell("echo boom >&2; exit 3")
            .score(&request(), &Params::new(), b"", b"")
            .await
            .unwrap_err();
        match err {
            HsError::Worker(message) => assert!(message.contains("boom")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
