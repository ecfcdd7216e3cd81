//! Source control abstraction and pull-request link construction.

pub mod git;

pub use git::GitCli;

use std::path::Path;

use async_trait::async_trait;
use url::Url;

use crate::error::VcsError;

/// Source control operations the saga needs.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Clone `url` into `dir`, which must not exist yet.
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), VcsError>;

    /// Create and check out branch `name` in the clone at `dir`.
    async fn create_branch(&self, dir: &Path, name: &str) -> Result<(), VcsError>;

    /// URL of the `origin` remote of the clone at `dir`.
    async fn remote_url(&self, dir: &Path) -> Result<String, VcsError>;
}

/// Where a repository is hosted, as far as pull-request links go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hosting {
    GitHub,
    GitLab,
    Bitbucket,
}

/// A remote URL broken down into host and repository path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    pub hosting: Hosting,
    pub host: String,
    /// `owner/name` (or `group/subgroup/name` on GitLab), without `.git`.
    pub path: String,
}

impl RemoteRepo {
    /// Parse HTTPS, `ssh://` and scp-style (`git@host:owner/repo.git`) remotes.
    pub fn parse(remote: &str) -> Result<Self, VcsError> {
        let remote = remote.trim();
        let unsupported = || VcsError::UnsupportedRemote(remote.to_string());

        let (host, path) = if remote.contains("://") {
            let url = Url::parse(remote).map_err(|_| unsupported())?;
            let host = url.host_str().ok_or_else(unsupported)?.to_string();
            (host, url.path().to_string())
        } else {
            // scp-like syntax: [user@]host:path
            let (user_host, path) = remote.split_once(':').ok_or_else(unsupported)?;
            let host = user_host.rsplit('@').next().unwrap_or(user_host).to_string();
            (host, path.to_string())
        };

        let path = path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path).to_string();
        if host.is_empty() || path.split('/').filter(|s| !s.is_empty()).count() < 2 {
            return Err(unsupported());
        }

        let host = host.to_ascii_lowercase();
        let hosting = if host == "github.com" || host.starts_with("github.") {
            Hosting::GitHub
        } else if host == "gitlab.com" || host.starts_with("gitlab.") {
            Hosting::GitLab
        } else if host == "bitbucket.org" {
            Hosting::Bitbucket
        } else {
            return Err(unsupported());
        };

        Ok(Self {
            hosting,
            host,
            path,
        })
    }
}

/// Link that opens a pull request from `branch` into `base_branch`.
pub fn build_pull_request_url(
    remote_url: &str,
    branch: &str,
    base_branch: &str,
) -> Result<String, VcsError> {
    if branch.trim().is_empty() || base_branch.trim().is_empty() {
        return Err(VcsError::Precondition(
            "branch and base branch must be non-empty".to_string(),
        ));
    }
    let repo = RemoteRepo::parse(remote_url)?;
    let web = format!("https://{}/{}", repo.host, repo.path);

    let link = match repo.hosting {
        Hosting::GitHub => format!("{web}/compare/{base_branch}...{branch}?expand=1"),
        Hosting::GitLab => {
            let mut url = Url::parse(&format!("{web}/-/merge_requests/new"))
                .map_err(|_| VcsError::UnsupportedRemote(remote_url.to_string()))?;
            url.query_pairs_mut()
                .append_pair("merge_request[source_branch]", branch)
                .append_pair("merge_request[target_branch]", base_branch);
            url.to_string()
        }
        Hosting::Bitbucket => {
            let mut url = Url::parse(&format!("{web}/pull-requests/new"))
                .map_err(|_| VcsError::UnsupportedRemote(remote_url.to_string()))?;
            url.query_pairs_mut()
                .append_pair("source", branch)
                .append_pair("dest", base_branch);
            url.to_string()
        }
    };
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_remote_formats() {
        for remote in [
            "git@github.com:acme/widgets.git",
            "https://github.com/acme/widgets.git",
            "https://github.com/acme/widgets",
            "ssh://git@github.com/acme/widgets.git",
        ] {
            let url = build_pull_request_url(remote, "agent/proj-1-7", "main").unwrap();
            assert_eq!(
                url,
                "https://github.com/acme/widgets/compare/main...agent/proj-1-7?expand=1",
                "remote {remote}"
            );
        }
    }

    #[test]
    fn gitlab_nested_groups() {
        let url = build_pull_request_url(
            "git@gitlab.com:acme/platform/widgets.git",
            "agent/proj-1-7",
            "develop",
        )
        .unwrap();
        assert!(url.starts_with("https://gitlab.com/acme/platform/widgets/-/merge_requests/new?"));
        assert!(url.contains("source_branch%5D=agent%2Fproj-1-7"));
        assert!(url.contains("target_branch%5D=develop"));
    }

    #[test]
    fn bitbucket_remote() {
        let url =
            build_pull_request_url("https://bitbucket.org/acme/widgets.git", "fix", "main").unwrap();
        assert_eq!(
            url,
            "https://bitbucket.org/acme/widgets/pull-requests/new?source=fix&dest=main"
        );
    }

    #[test]
    fn unknown_hosts_are_rejected() {
        for remote in [
            "https://git.internal.example/acme/widgets.git",
            "/srv/git/widgets.git",
            "github.com",
            "https://github.com/onlyowner",
        ] {
            let err = build_pull_request_url(remote, "b", "main").unwrap_err();
            assert!(matches!(err, VcsError::UnsupportedRemote(_)), "remote {remote}");
        }
    }

    #[test]
    fn empty_branch_is_a_precondition() {
        let err = build_pull_request_url("git@github.com:a/b.git", "", "main").unwrap_err();
        assert!(matches!(err, VcsError::Precondition(_)));
    }
}
