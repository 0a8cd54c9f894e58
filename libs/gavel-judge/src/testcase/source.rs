use super::DataSource;
use crate::error::TestcaseError;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Reads `<root>/<problem id>.json`.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, problem_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", problem_id))
    }
}

#[async_trait]
impl DataSource for FileSource {
    async fn get(&self, problem_id: &str) -> Result<Vec<u8>, TestcaseError> {
        let path = self.path(problem_id);
        debug!(path = %path.display(), "Reading testcase file");
        tokio::fs::read(&path).await.map_err(|e| TestcaseError::Source {
            problem_id: problem_id.to_string(),
            message: format!("{}: {}", path.display(), e),
        })
    }
}

/// Fetches `GET <base>/<problem id>` from the problem service.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, problem_id: &str) -> String {
        format!("{}/{}", self.base_url, problem_id)
    }
}

#[async_trait]
impl DataSource for HttpSource {
    async fn get(&self, problem_id: &str) -> Result<Vec<u8>, TestcaseError> {
        let url = self.url(problem_id);
        let fail = |e: reqwest::Error| TestcaseError::Source {
            problem_id: problem_id.to_string(),
            message: e.to_string(),
        };

        debug!(url = %url, "Fetching testcase");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fail)?;
        let body = response.bytes().await.map_err(fail)?;
        Ok(body.to_vec())
    }
}
