//! Git checkout (spec §4.6 `/api/git/checkout`). Runs `git clone` into a
//! validated target directory after the URL passes [`validate_git_url`].

use std::path::Path;

use tokio::process::Command;

use crate::errors::{ContainerError, ContainerResult};
use crate::security::{redact_credentials, validate_git_url};

pub struct CheckoutRequest<'a> {
    pub repo_url: &'a str,
    pub branch: Option<&'a str>,
    pub target_dir: &'a Path,
    pub depth: Option<u32>,
    pub allowlist: Option<&'a [String]>,
}

pub struct CheckoutOutcome {
    pub output: String,
    pub exit_code: i32,
}

pub async fn checkout(request: CheckoutRequest<'_>) -> ContainerResult<CheckoutOutcome> {
    let validation = validate_git_url(request.repo_url, request.allowlist);
    if !validation.ok {
        return Err(ContainerError::InvalidGitUrl {
            url: request.repo_url.to_string(),
            reasons: validation.errors,
        });
    }

    tracing::info!(
        url = %redact_credentials(request.repo_url),
        branch = ?request.branch,
        target = %request.target_dir.display(),
        "git checkout"
    );

    let mut command = Command::new("git");
    command.arg("clone");
    if let Some(branch) = request.branch {
        command.arg("--branch").arg(branch);
    }
    if let Some(depth) = request.depth {
        command.arg("--depth").arg(depth.to_string());
    }
    command.arg(request.repo_url).arg(request.target_dir);

    let result = command
        .output()
        .await
        .map_err(|e| ContainerError::GitOperationFailed {
            message: e.to_string(),
        })?;

    let exit_code = result.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&result.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&result.stderr).into_owned();
    let combined = format!("{stdout}{stderr}");

    if !result.status.success() {
        let err = classify_git_failure(request.repo_url, &stderr, exit_code);
        tracing::warn!(url = %redact_credentials(request.repo_url), code = err.code(), "git checkout failed");
        return Err(err);
    }

    Ok(CheckoutOutcome {
        output: combined,
        exit_code,
    })
}

fn classify_git_failure(url: &str, stderr: &str, exit_code: i32) -> ContainerError {
    let lower = stderr.to_lowercase();
    if lower.contains("could not read username")
        || lower.contains("authentication failed")
        || lower.contains("permission denied (publickey)")
    {
        return ContainerError::GitAuthenticationFailed {
            url: url.to_string(),
        };
    }
    if lower.contains("repository not found") || lower.contains("does not exist") {
        return ContainerError::GitRepositoryNotFound {
            url: url.to_string(),
        };
    }
    if lower.contains("remote branch") && lower.contains("not found") {
        return ContainerError::GitBranchNotFound {
            branch: url.to_string(),
        };
    }
    if lower.contains("could not resolve host") || lower.contains("network is unreachable") {
        return ContainerError::GitNetworkError {
            message: stderr.to_string(),
        };
    }
    ContainerError::GitCloneFailed {
        stderr: stderr.to_string(),
        exit_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_scheme_before_spawning_git() {
        let dir = tempfile::tempdir().unwrap();
        let result = checkout(CheckoutRequest {
            repo_url: "ftp://evil/repo.git",
            branch: None,
            target_dir: &dir.path().join("x"),
            depth: None,
            allowlist: None,
        })
        .await;
        match result {
            Err(ContainerError::InvalidGitUrl { .. }) => {}
            other => panic!("expected InvalidGitUrl, got {other:?}"),
        }
    }

    #[test]
    fn classifies_authentication_failures() {
        let err = classify_git_failure("url", "fatal: Authentication failed for 'url'", 128);
        assert_eq!(err.code(), "GIT_AUTHENTICATION_FAILED");
    }

    #[test]
    fn classifies_missing_repository() {
        let err = classify_git_failure("url", "remote: Repository not found.", 128);
        assert_eq!(err.code(), "GIT_REPOSITORY_NOT_FOUND");
    }

    #[test]
    fn falls_back_to_generic_clone_failure() {
        let err = classify_git_failure("url", "fatal: some other failure", 128);
        assert_eq!(err.code(), "GIT_CLONE_FAILED");
    }
}
