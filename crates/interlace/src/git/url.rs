//! Parsing of kustomize-style remote references.
//!
//! Accepted forms include `https://host/org/repo`, `https://host/org/repo.git//sub/dir?ref=v1`,
//! `host/org/repo/sub/dir?ref=main` and `git@host:org/repo.git`.

/// A remote git reference split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    /// Scheme and host including the trailing separator, e.g. `https://github.com/`.
    pub host: String,
    /// Repository path without `.git`, e.g. `org/repo`.
    pub org_repo: String,
    /// Directory inside the repository, without leading or trailing slashes.
    pub path: String,
    /// Branch, tag or commit from `?ref=` / `?version=`.
    pub git_ref: String,
    /// `.git` when the original reference carried it.
    pub suffix: String,
}

impl GitUrl {
    /// URL to hand to `git clone`.
    pub fn clone_url(&self) -> String {
        format!("{}{}{}", self.host, self.org_repo, self.suffix)
    }

    /// Canonical repository URI, always ending in `.git`.
    pub fn repo_uri(&self) -> String {
        format!("{}{}.git", self.host, self.org_repo)
    }
}

pub fn parse_git_url(raw: &str) -> Result<GitUrl, String> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("git::").unwrap_or(raw);
    if raw.is_empty() {
        return Err("empty URL".to_string());
    }

    let (location, query) = match raw.split_once('?') {
        Some((location, query)) => (location, query),
        None => (raw, ""),
    };
    let git_ref = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "ref" || *key == "version")
        .map(|(_, value)| value.to_string())
        .unwrap_or_default();

    let (host, rest) = split_host(location)?;

    let (repo_part, path) = if let Some((repo, sub)) = rest.split_once("//") {
        (repo.to_string(), sub.to_string())
    } else if let Some(idx) = rest.find(".git/") {
        (rest[..idx + 4].to_string(), rest[idx + 5..].to_string())
    } else if rest.ends_with(".git") {
        (rest.to_string(), String::new())
    } else {
        let mut segments = rest.splitn(3, '/');
        let org = segments.next().unwrap_or_default();
        let repo = segments.next().unwrap_or_default();
        let sub = segments.next().unwrap_or_default();
        (format!("{}/{}", org, repo), sub.to_string())
    };

    let repo_part = repo_part.trim_matches('/');
    let (org_repo, suffix) = match repo_part.strip_suffix(".git") {
        Some(stripped) => (stripped.to_string(), ".git".to_string()),
        None => (repo_part.to_string(), String::new()),
    };

    let has_org_and_repo = org_repo
        .split_once('/')
        .is_some_and(|(org, repo)| !org.is_empty() && !repo.is_empty());
    if !has_org_and_repo {
        return Err(format!("no organization/repository in '{}'", raw));
    }

    Ok(GitUrl {
        host,
        org_repo,
        path: path.trim_matches('/').to_string(),
        git_ref,
        suffix,
    })
}

/// Whether a kustomization entry points at a remote repository rather than a local path.
pub fn is_remote_reference(entry: &str) -> bool {
    let entry = entry.trim();
    if entry.starts_with('.') || entry.starts_with('/') {
        return false;
    }
    if ["https://", "http://", "ssh://", "git@", "git::"]
        .iter()
        .any(|p| entry.starts_with(p))
    {
        return true;
    }
    let first = entry.split('/').next().unwrap_or_default();
    first.contains('.') && entry.split('/').count() >= 3
}

fn split_host(location: &str) -> Result<(String, &str), String> {
    if let Some((scheme, after)) = location.split_once("://") {
        let (host, rest) = after
            .split_once('/')
            .ok_or_else(|| format!("no repository path in '{}'", location))?;
        return Ok((format!("{}://{}/", scheme, host), rest));
    }

    if let Some(after) = location.strip_prefix("git@") {
        let (host, rest) = after
            .split_once(':')
            .ok_or_else(|| format!("malformed scp-style URL '{}'", location))?;
        return Ok((format!("git@{}:", host), rest));
    }

    let (host, rest) = location
        .split_once('/')
        .ok_or_else(|| format!("no repository path in '{}'", location))?;
    if !host.contains('.') {
        return Err(format!("'{}' is not a remote host", host));
    }
    Ok((format!("https://{}/", host), rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_https_repository() {
        let url = parse_git_url("https://github.com/org/apps").unwrap();
        assert_eq!(url.host, "https://github.com/");
        assert_eq!(url.org_repo, "org/apps");
        assert_eq!(url.path, "");
        assert_eq!(url.git_ref, "");
        assert_eq!(url.clone_url(), "https://github.com/org/apps");
        assert_eq!(url.repo_uri(), "https://github.com/org/apps.git");
    }

    #[test]
    fn double_slash_subpath_and_ref() {
        let url = parse_git_url("https://github.com/org/apps.git//deploy/base/?ref=v1.0").unwrap();
        assert_eq!(url.org_repo, "org/apps");
        assert_eq!(url.suffix, ".git");
        assert_eq!(url.path, "deploy/base");
        assert_eq!(url.git_ref, "v1.0");
        assert_eq!(url.clone_url(), "https://github.com/org/apps.git");
    }

    #[test]
    fn schemeless_host_with_path() {
        let url = parse_git_url("github.com/org/apps/overlays/prod?ref=main").unwrap();
        assert_eq!(url.host, "https://github.com/");
        assert_eq!(url.org_repo, "org/apps");
        assert_eq!(url.path, "overlays/prod");
        assert_eq!(url.git_ref, "main");
    }

    #[test]
    fn nested_groups_with_dot_git() {
        let url = parse_git_url("https://gitlab.example/group/sub/repo.git/base").unwrap();
        assert_eq!(url.org_repo, "group/sub/repo");
        assert_eq!(url.path, "base");
    }

    #[test]
    fn scp_style() {
        let url = parse_git_url("git@github.com:org/apps.git").unwrap();
        assert_eq!(url.host, "git@github.com:");
        assert_eq!(url.clone_url(), "git@github.com:org/apps.git");
    }

    #[test]
    fn rejects_local_and_incomplete_references() {
        assert!(parse_git_url("").is_err());
        assert!(parse_git_url("base/overlay").is_err());
        assert!(parse_git_url("https://github.com/org").is_err());
    }

    #[test]
    fn remote_reference_detection() {
        assert!(is_remote_reference("github.com/org/repo/base?ref=v1"));
        assert!(is_remote_reference("https://github.com/org/repo"));
        assert!(!is_remote_reference("../base"));
        assert!(!is_remote_reference("deployment.yaml"));
        assert!(!is_remote_reference("overlays/prod"));
    }
}
