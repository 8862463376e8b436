use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::model::Application;
use crate::workspace::{self, MANIFEST_FILE_NAME, SIGNED_MANIFEST_FILE_NAME, SOURCE_CHECKOUT_DIR};

/// Source coordinates extracted from a qualifying status event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub app_name: String,
    pub app_path: String,
    pub repo_url: String,
    pub revision: String,
    pub commit_sha: String,
    pub cluster_url: String,
    pub chart: Option<String>,
    pub values: Option<String>,
}

impl SourceInfo {
    pub fn from_application(app: &Application) -> Self {
        let source = app.effective_source();
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        Self {
            app_name: app.metadata.name.clone(),
            app_path: source.path.clone(),
            repo_url: source.repo_url.clone(),
            revision: source.target_revision.clone(),
            commit_sha: app.status.sync.revision.clone(),
            cluster_url: app.effective_server().to_string(),
            chart: non_empty(&source.chart),
            values: source.helm.as_ref().and_then(|h| non_empty(&h.values)),
        }
    }

    pub fn is_helm(&self) -> bool {
        self.chart.is_some()
    }
}

/// Everything one reconciliation cycle knows about its application.
///
/// Built once by the orchestrator and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ApplicationContext {
    source: SourceInfo,
    previous_commit_sha: String,
    work_dir: PathBuf,
    build_started_on: DateTime<Utc>,
}

impl ApplicationContext {
    pub fn new(
        source: SourceInfo,
        previous_commit_sha: impl Into<String>,
        work_root: &Path,
        build_started_on: DateTime<Utc>,
    ) -> Self {
        let work_dir = workspace::work_dir_for(work_root, &source.app_name, &source.app_path);
        Self {
            source,
            previous_commit_sha: previous_commit_sha.into(),
            work_dir,
            build_started_on,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.source.app_name
    }

    pub fn app_path(&self) -> &str {
        &self.source.app_path
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn cluster_url(&self) -> &str {
        &self.source.cluster_url
    }

    pub fn source_repo_url(&self) -> &str {
        &self.source.repo_url
    }

    pub fn source_revision(&self) -> &str {
        &self.source.revision
    }

    pub fn source_commit_sha(&self) -> &str {
        &self.source.commit_sha
    }

    pub fn previous_commit_sha(&self) -> &str {
        &self.previous_commit_sha
    }

    pub fn chart(&self) -> Option<&str> {
        self.source.chart.as_deref()
    }

    pub fn values(&self) -> Option<&str> {
        self.source.values.as_deref()
    }

    pub fn is_helm(&self) -> bool {
        self.source.is_helm()
    }

    pub fn build_started_on(&self) -> DateTime<Utc> {
        self.build_started_on
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.work_dir.join(MANIFEST_FILE_NAME)
    }

    pub fn signed_manifest_path(&self) -> PathBuf {
        self.work_dir.join(SIGNED_MANIFEST_FILE_NAME)
    }

    pub fn source_checkout_dir(&self) -> PathBuf {
        self.work_dir.join(SOURCE_CHECKOUT_DIR)
    }

    /// Name of the Helm chart archive, `<chart>-<revision>.tgz`.
    pub fn chart_archive_name(&self) -> Option<String> {
        self.chart()
            .map(|chart| format!("{}-{}.tgz", chart, self.source_revision()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::model::{ApplicationSource, HelmSource};

    #[test]
    fn helm_source_carries_chart_and_values() {
        let mut app = Application::default();
        app.metadata.name = "nginx".to_string();
        app.status.sync.compared_to.source = ApplicationSource {
            repo_url: "https://charts.example".to_string(),
            path: String::new(),
            target_revision: "1.2.3".to_string(),
            chart: "nginx".to_string(),
            helm: Some(HelmSource {
                values: "replicas: 2".to_string(),
                value_files: Vec::new(),
            }),
        };

        let source = SourceInfo::from_application(&app);
        assert!(source.is_helm());
        assert_eq!(source.values.as_deref(), Some("replicas: 2"));

        let ctx = ApplicationContext::new(source, "", Path::new("/tmp/output"), Utc::now());
        assert_eq!(ctx.chart_archive_name().as_deref(), Some("nginx-1.2.3.tgz"));
        assert_eq!(ctx.work_dir(), Path::new("/tmp/output/nginx"));
    }

    #[test]
    fn kustomize_context_paths() {
        let source = SourceInfo {
            app_name: "guestbook".to_string(),
            app_path: "apps/guestbook".to_string(),
            repo_url: "https://github.com/org/apps".to_string(),
            ..Default::default()
        };
        let ctx = ApplicationContext::new(source, "prev", Path::new("/w"), Utc::now());

        assert!(!ctx.is_helm());
        assert_eq!(ctx.previous_commit_sha(), "prev");
        assert_eq!(
            ctx.manifest_path(),
            PathBuf::from("/w/guestbook/apps/guestbook/manifest.yaml")
        );
        assert_eq!(
            ctx.source_checkout_dir(),
            PathBuf::from("/w/guestbook/apps/guestbook/source")
        );
        assert!(ctx.chart_archive_name().is_none());
    }
}
