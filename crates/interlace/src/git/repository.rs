//! Git repository operations.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as TokioCommand;

use super::auth::{build_auth_env, GitCredentials};
use crate::error::{classify_git_error, GitError};
use crate::process::format_output_error;

type Result<T> = std::result::Result<T, GitError>;

/// A local working copy driven through the `git` CLI.
pub struct GitRepository {
    repo_path: PathBuf,
    program: String,
}

impl GitRepository {
    pub fn open(repo_path: impl Into<PathBuf>, program: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            program: program.into(),
        }
    }

    /// Shallow-clones `url` into `dest`.
    ///
    /// `reference` may be a branch, a tag, or a full commit SHA; commits are
    /// fetched directly since `clone --branch` only accepts refs.
    pub async fn shallow_clone(
        program: &str,
        url: &str,
        dest: &Path,
        reference: Option<&str>,
        credentials: Option<&GitCredentials>,
    ) -> Result<Self> {
        if dest.exists() {
            std::fs::remove_dir_all(dest)?;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let dest_str = dest
            .to_str()
            .ok_or_else(|| GitError::Operation(format!("Non-UTF8 path: {}", dest.display())))?;

        match reference.filter(|r| !r.is_empty()) {
            Some(sha) if is_commit_sha(sha) => {
                std::fs::create_dir_all(dest)?;
                let repo = Self::open(dest, program);
                repo.check(&["init", "--quiet"])?;
                repo.check(&["remote", "add", "origin", url])?;
                repo.run_network(&["fetch", "--depth", "1", "origin", sha], credentials)
                    .await?;
                repo.check(&["checkout", "--quiet", "--detach", "FETCH_HEAD"])?;
                Ok(repo)
            }
            Some(branch) => {
                let cwd = Self::open(dest.parent().unwrap_or(Path::new(".")), program);
                cwd.run_network(
                    &["clone", "--depth", "1", "--branch", branch, url, dest_str],
                    credentials,
                )
                .await?;
                Ok(Self::open(dest, program))
            }
            None => {
                let cwd = Self::open(dest.parent().unwrap_or(Path::new(".")), program);
                cwd.run_network(&["clone", "--depth", "1", url, dest_str], credentials)
                    .await?;
                Ok(Self::open(dest, program))
            }
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    #[cfg(test)]
    pub fn is_git_repo(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    /// Full SHA of the checked-out commit.
    #[cfg(test)]
    pub fn head_commit(&self) -> Result<String> {
        let output = self.check(&["rev-parse", "HEAD"])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Stages a path relative to the repository root.
    pub fn add(&self, relative: &Path) -> Result<()> {
        let path = relative
            .to_str()
            .ok_or_else(|| GitError::Operation(format!("Non-UTF8 path: {}", relative.display())))?;
        self.check(&["add", "--all", "--", path])?;
        Ok(())
    }

    /// Commits staged changes as the given author.
    ///
    /// Returns `None` when there was nothing to commit.
    pub fn commit(&self, message: &str, author_name: &str, author_email: &str) -> Result<Option<String>> {
        let status = self.check(&["status", "--porcelain"])?;
        if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
            return Ok(None);
        }

        let name = format!("user.name={}", author_name);
        let email = format!("user.email={}", author_email);
        self.check(&["-c", &name, "-c", &email, "commit", "--quiet", "-m", message])?;

        let hash = self.check(&["rev-parse", "--short", "HEAD"])?;
        Ok(Some(String::from_utf8_lossy(&hash.stdout).trim().to_string()))
    }

    /// Pushes `HEAD` to `branch` on origin.
    pub async fn push(&self, branch: &str, credentials: Option<&GitCredentials>) -> Result<()> {
        let refspec = format!("HEAD:{}", branch);
        self.run_network(&["push", "--progress", "origin", &refspec], credentials)
            .await
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    /// Runs a local git command in the repository directory.
    fn run_git(&self, args: &[&str]) -> Result<Output> {
        Command::new(&self.program)
            .current_dir(&self.repo_path)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| GitError::Operation(e.to_string()))
    }

    fn check(&self, args: &[&str]) -> Result<Output> {
        let output = self.run_git(args)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(GitError::Operation(format_output_error(&output)))
        }
    }

    /// Runs a command that talks to the remote, streaming its progress to the log.
    async fn run_network(&self, args: &[&str], credentials: Option<&GitCredentials>) -> Result<()> {
        let auth = build_auth_env(credentials)?;

        let mut cmd = TokioCommand::new(&self.program);
        cmd.current_dir(&self.repo_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &auth.env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| GitError::Operation(e.to_string()))?;

        let stderr_pipe = child.stderr.take();
        let stdout_pipe = child.stdout.take();

        let stderr_task = async {
            let mut collected = Vec::new();
            if let Some(stderr) = stderr_pipe {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("git {}: {}", args[0], line);
                    collected.push(line);
                }
            }
            collected
        };

        let stdout_task = async {
            if let Some(stdout) = stdout_pipe {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(_line)) = lines.next_line().await {
                    // Drain stdout to prevent pipe buffer from filling
                }
            }
        };

        let (stderr_lines, ()) = tokio::join!(stderr_task, stdout_task);

        let status = child
            .wait()
            .await
            .map_err(|e| GitError::Operation(e.to_string()))?;

        drop(auth);

        if status.success() {
            Ok(())
        } else if stderr_lines.is_empty() {
            Err(GitError::Operation(format!(
                "git {} failed with exit code {}",
                args[0],
                status.code().unwrap_or(-1)
            )))
        } else {
            Err(classify_git_error(&stderr_lines.join("\n")))
        }
    }
}

fn is_commit_sha(reference: &str) -> bool {
    reference.len() == 40 && reference.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .current_dir(dir)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    /// Creates a bare "remote" with one commit on `main`.
    fn seeded_remote(root: &Path) -> PathBuf {
        let remote = root.join("remote.git");
        let seed = root.join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        git(root, &["init", "--quiet", "--bare", "remote.git"]);
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["checkout", "--quiet", "-b", "main"]);
        std::fs::write(seed.join("README"), "seed\n").unwrap();
        git(&seed, &["add", "README"]);
        git(
            &seed,
            &["-c", "user.name=t", "-c", "user.email=t@t", "commit", "--quiet", "-m", "seed"],
        );
        git(&seed, &["push", "--quiet", remote.to_str().unwrap(), "main"]);
        remote
    }

    #[test]
    fn commit_sha_detection() {
        assert!(is_commit_sha("0123456789abcdef0123456789abcdef01234567"));
        assert!(!is_commit_sha("main"));
        assert!(!is_commit_sha("0123456"));
    }

    #[test]
    fn clone_commit_and_push_round_trip() {
        let root = TempDir::new().unwrap();
        let remote = seeded_remote(root.path());
        let remote_url = remote.to_str().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();

        let repo = rt
            .block_on(GitRepository::shallow_clone(
                "git",
                remote_url,
                &root.path().join("work"),
                Some("main"),
                None,
            ))
            .unwrap();
        assert!(repo.is_git_repo());

        std::fs::create_dir_all(repo.repo_path().join("app")).unwrap();
        std::fs::write(repo.repo_path().join("app/configmap.yaml"), "kind: ConfigMap\n").unwrap();
        repo.add(Path::new("app")).unwrap();
        let hash = repo.commit("Update signed manifest", "bot", "bot@example.com").unwrap();
        assert!(hash.is_some());
        assert!(repo.commit("again", "bot", "bot@example.com").unwrap().is_none());
        rt.block_on(repo.push("main", None)).unwrap();

        let head = repo.head_commit().unwrap();
        let pinned = rt
            .block_on(GitRepository::shallow_clone(
                "git",
                &format!("file://{}", remote_url),
                &root.path().join("pinned"),
                Some(&head),
                None,
            ))
            .unwrap();
        assert_eq!(pinned.head_commit().unwrap(), head);
        assert!(pinned.repo_path().join("app/configmap.yaml").exists());
    }

    #[test]
    fn clone_failure_is_classified() {
        let root = TempDir::new().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(GitRepository::shallow_clone(
            "git",
            root.path().join("missing.git").to_str().unwrap(),
            &root.path().join("work"),
            None,
            None,
        ));
        assert!(matches!(result, Err(GitError::Operation(_))));
    }
}
