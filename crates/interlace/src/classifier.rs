//! Decides which application status transitions start a cycle.

use crate::app::{Application, SourceInfo};

const PHASE_RUNNING: &str = "Running";
const HEALTH_MISSING: &str = "Missing";
const SYNC_OUT_OF_SYNC: &str = "OutOfSync";
const SYNC_SYNCED: &str = "Synced";

/// Result of classifying a status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Skip,
    Create(SourceInfo),
    Update {
        source: SourceInfo,
        previous_commit_sha: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct EventClassifier {
    manifest_repo_url: Option<String>,
}

impl EventClassifier {
    /// `manifest_repo_url` is the repository the git backend writes to; events
    /// sourced from it are the pipeline's own commits and are ignored.
    pub fn new(manifest_repo_url: Option<String>) -> Self {
        Self {
            manifest_repo_url: manifest_repo_url.filter(|u| !u.is_empty()),
        }
    }

    pub fn classify(&self, previous: &Application, current: &Application) -> Classification {
        let source = SourceInfo::from_application(current);

        if self.is_self_loop(&source.repo_url) {
            tracing::debug!(
                app = %source.app_name,
                "Ignoring event sourced from the manifest storage repository"
            );
            return Classification::Skip;
        }

        if is_create(previous, current) {
            return Classification::Create(source);
        }

        if is_update(previous, current) {
            return Classification::Update {
                previous_commit_sha: current.last_history_revision().to_string(),
                source,
            };
        }

        Classification::Skip
    }

    fn is_self_loop(&self, repo_url: &str) -> bool {
        self.manifest_repo_url
            .as_deref()
            .is_some_and(|manifest_repo| normalize(manifest_repo) == normalize(repo_url))
    }
}

fn is_running(app: &Application) -> bool {
    app.phase() == Some(PHASE_RUNNING)
}

fn is_create(previous: &Application, current: &Application) -> bool {
    previous.health().is_empty()
        && is_running(previous)
        && previous.sync().is_empty()
        && current.health() == HEALTH_MISSING
        && is_running(current)
        && current.sync() == SYNC_OUT_OF_SYNC
}

fn is_update(previous: &Application, current: &Application) -> bool {
    is_running(previous)
        && previous.sync() == SYNC_SYNCED
        && is_running(current)
        && current.sync() == SYNC_OUT_OF_SYNC
}

fn normalize(url: &str) -> &str {
    let url = url.trim().trim_end_matches('/');
    url.strip_suffix(".git").unwrap_or(url)
}
