//! ManifestSource capability (spec.md §1, §7): list manifest filenames and
//! fetch one by name. [`GitManifestSource`] is grounded in
//! `original_source/shared/git_service.py`'s use of the GitHub contents
//! API; [`LocalManifestSource`] reads a directory for local/dev use.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;

use crate::error::EngineError;

#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn list(&self) -> Result<Vec<String>, EngineError>;
    async fn fetch(&self, name: &str) -> Result<String, EngineError>;
}

/// Fetches pipeline manifests from a GitHub repository's contents API,
/// mirroring `GitService.list_pipelines` / `GitService.get_pipeline_yaml`.
pub struct GitManifestSource {
    client: reqwest::Client,
    owner: String,
    repo: String,
    pipelines_path: String,
    branch: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ContentsEntry {
    name: String,
    #[serde(rename = "type")]
    entry_type: String,
}

#[derive(Deserialize)]
struct FileContent {
    content: String,
    encoding: String,
}

impl GitManifestSource {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        pipelines_path: impl Into<String>,
        branch: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            owner: owner.into(),
            repo: repo.into(),
            pipelines_path: pipelines_path.into(),
            branch: branch.into(),
            token,
        }
    }

    /// Parse `https://github.com/<owner>/<repo>[.git]` or
    /// `git@github.com:<owner>/<repo>.git` into owner/repo, as the original
    /// `GitService._parse_repo_info` does.
    pub fn from_repo_url(
        repo_url: &str,
        pipelines_path: impl Into<String>,
        branch: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, EngineError> {
        let trimmed = repo_url.trim().trim_end_matches(".git");
        let rest = if let Some(r) = trimmed.strip_prefix("https://github.com/") {
            r
        } else if let Some(r) = trimmed.strip_prefix("git@github.com:") {
            r
        } else {
            return Err(EngineError::ManifestSource(format!(
                "unsupported repository URL format: {repo_url}"
            )));
        };
        let mut parts = rest.splitn(2, '/');
        let owner = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::ManifestSource(format!("invalid repository URL: {repo_url}")))?;
        let repo = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::ManifestSource(format!("invalid repository URL: {repo_url}")))?;
        Ok(Self::new(owner, repo, pipelines_path, branch, token))
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/contents/{}",
            self.owner, self.repo, path
        )
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github.v3+json")
            .query(&[("ref", &self.branch)]);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("token {token}"));
        }
        req
    }
}

#[async_trait]
impl ManifestSource for GitManifestSource {
    async fn list(&self) -> Result<Vec<String>, EngineError> {
        let url = self.contents_url(&self.pipelines_path);
        let resp = self
            .request(&url)
            .send()
            .await
            .map_err(|e| EngineError::ManifestSource(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(EngineError::ManifestSource(format!(
                "listing pipelines failed with status {}",
                resp.status()
            )));
        }

        let entries: Vec<ContentsEntry> = resp
            .json()
            .await
            .map_err(|e| EngineError::ManifestSource(e.to_string()))?;

        Ok(entries
            .into_iter()
            .filter(|e| e.entry_type == "file" && (e.name.ends_with(".yaml") || e.name.ends_with(".yml")))
            .map(|e| e.name)
            .collect())
    }

    async fn fetch(&self, name: &str) -> Result<String, EngineError> {
        let path = format!("{}/{}", self.pipelines_path, name);
        let url = self.contents_url(&path);
        let resp = self
            .request(&url)
            .send()
            .await
            .map_err(|e| EngineError::ManifestSource(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EngineError::ManifestSource(format!(
                "fetching manifest '{name}' failed with status {}",
                resp.status()
            )));
        }

        let file: FileContent = resp
            .json()
            .await
            .map_err(|e| EngineError::ManifestSource(e.to_string()))?;

        if file.encoding == "base64" {
            let cleaned: String = file.content.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(cleaned)
                .map_err(|e| EngineError::ManifestSource(format!("invalid base64 content: {e}")))?;
            String::from_utf8(bytes).map_err(|e| EngineError::ManifestSource(e.to_string()))
        } else {
            Ok(file.content)
        }
    }
}

/// Reads manifests from a local directory; used for development and tests
/// in place of a real Git-hosted repository.
pub struct LocalManifestSource {
    dir: PathBuf,
}

impl LocalManifestSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ManifestSource for LocalManifestSource {
    async fn list(&self) -> Result<Vec<String>, EngineError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::ManifestSource(e.to_string())),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::ManifestSource(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".yaml") || name.ends_with(".yml") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn fetch(&self, name: &str) -> Result<String, EngineError> {
        tokio::fs::read_to_string(self.dir.join(name))
            .await
            .map_err(|e| EngineError::ManifestSource(format!("reading '{name}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_and_ssh_repo_urls() {
        let src = GitManifestSource::from_repo_url(
            "https://github.com/acme/pipelines.git",
            "pipelines",
            "main",
            None,
        )
        .unwrap();
        assert_eq!(src.owner, "acme");
        assert_eq!(src.repo, "pipelines");

        let src = GitManifestSource::from_repo_url(
            "git@github.com:acme/pipelines.git",
            "pipelines",
            "main",
            None,
        )
        .unwrap();
        assert_eq!(src.owner, "acme");
        assert_eq!(src.repo, "pipelines");
    }

    #[test]
    fn rejects_unsupported_url_format() {
        assert!(GitManifestSource::from_repo_url("ftp://nope", "p", "main", None).is_err());
    }

    #[tokio::test]
    async fn local_source_lists_and_fetches_yaml_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "name: a\njobs: {}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = LocalManifestSource::new(dir.path());
        assert_eq!(source.list().await.unwrap(), vec!["a.yaml".to_string()]);
        assert!(source.fetch("a.yaml").await.unwrap().contains("name: a"));
    }

    #[tokio::test]
    async fn missing_directory_lists_as_empty() {
        let source = LocalManifestSource::new("/nonexistent/path/for/tests");
        assert_eq!(source.list().await.unwrap(), Vec::<String>::new());
    }
}
