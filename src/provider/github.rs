//! GitHub provider.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use crate::error::{CacheError, Result};

use super::{compute_repo_hash, Provider, ProviderRepo, RepoRequest};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "git-rest-cache/1.0";

/// Upper bound on the upstream token-validation round trip.
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct GithubProvider;

impl Provider for GithubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn url_path(&self) -> &'static str {
        "/github/{owner}/{repo}"
    }

    fn get_repo(&self, request: RepoRequest) -> Result<Box<dyn ProviderRepo>> {
        Ok(Box::new(GithubRepo {
            owner: request.owner,
            repo: request.repo,
            token: request.token,
        }))
    }
}

pub struct GithubRepo {
    owner: String,
    repo: String,
    token: Option<String>,
}

#[async_trait::async_trait]
impl ProviderRepo for GithubRepo {
    fn hash(&self) -> String {
        compute_repo_hash(
            "github",
            &self.owner,
            &self.repo,
            self.token.as_deref().unwrap_or(""),
        )
    }

    fn repo_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.repo)
    }

    fn git_url(&self) -> String {
        match &self.token {
            Some(token) => format!(
                "https://{token}@github.com/{}/{}.git",
                self.owner, self.repo
            ),
            None => format!("https://github.com/{}/{}.git", self.owner, self.repo),
        }
    }

    async fn validate_token(&self, client: &reqwest::Client, token: &str) -> Result<bool> {
        let url = format!("{API_BASE}/repos/{}/{}", self.owner, self.repo);

        let mut request = client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .timeout(VALIDATE_TIMEOUT);
        if !token.is_empty() {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| CacheError::TokenValidation(e.to_string()))?;

        let status = response.status();
        debug!(owner = %self.owner, repo = %self.repo, %status, "token validation response");

        match status {
            StatusCode::OK => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(false),
            other => Err(CacheError::TokenValidation(format!(
                "unexpected status code: {other}"
            ))),
        }
    }
}
