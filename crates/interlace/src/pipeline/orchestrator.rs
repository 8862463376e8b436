use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info_span, Instrument};

use crate::app::{Application, ApplicationContext};
use crate::attestation::{AttestationBuilder, RekorCli, TransparencyLog};
use crate::classifier::{Classification, EventClassifier};
use crate::config::{InterlaceConfig, StorageKind};
use crate::error::{ConfigError, InterlaceError, VerificationError};
use crate::manifest::{write_manifest, ArgoCdClient, DriftOutcome, ManifestSynthesizer};
use crate::secrets::PassphraseSource;
use crate::signing::KeySource;
use crate::storage::{BackendFactory, ConfiguredBackends, SigningServices, StorageBackend};
use crate::verify::{GpgvCli, HelmSigstoreCli, HelmVerifier, KustomizeVerifier, SourceVerifier};
use crate::workspace;

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The event did not qualify.
    Skipped,
    /// The application has no managed resources.
    NothingGenerated,
    /// The desired state matches what is stored.
    Unchanged { provenance: bool },
    /// A new signed bundle was stored.
    Stored { provenance: bool },
}

/// Runs one reconciliation cycle per application status event.
pub struct Orchestrator {
    classifier: EventClassifier,
    synthesizer: ManifestSynthesizer,
    helm: Arc<dyn SourceVerifier>,
    kustomize: Arc<dyn SourceVerifier>,
    backends: Arc<dyn BackendFactory>,
    work_root: PathBuf,
    always_generate_provenance: bool,
}

impl Orchestrator {
    /// Production constructor: wires every port to its real implementation.
    pub fn from_config(config: Arc<InterlaceConfig>) -> Result<Self, InterlaceError> {
        let api = Arc::new(ArgoCdClient::new(&config.argocd)?);

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.argocd.insecure_tls)
            .build()
            .map_err(|e| ConfigError::Validation {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        let helm = Arc::new(HelmVerifier::new(
            http,
            Arc::new(HelmSigstoreCli::new(config.tools.helm.clone())),
        ));
        let kustomize = Arc::new(KustomizeVerifier::new(
            config.tools.git.clone(),
            config.verification.clone(),
            Arc::new(GpgvCli::new(config.tools.gpgv.clone())),
        ));

        let keys = Arc::new(
            KeySource::new(config.signing.key_path.clone(), PassphraseSource::default())
                .resolve_passphrase()?,
        );
        let tlog = RekorCli::from_config(&config).map(|cli| Arc::new(cli) as Arc<dyn TransparencyLog>);
        let attestations = Arc::new(AttestationBuilder::new(
            keys.clone(),
            config.signing.public_key_path.clone(),
            config.argocd.namespace.clone(),
            tlog,
        ));

        let manifest_repo = match config.storage {
            StorageKind::Git => config.git.as_ref().map(|g| g.url.clone()),
            StorageKind::Annotation | StorageKind::Oci => None,
        };

        Ok(Self {
            classifier: EventClassifier::new(manifest_repo),
            synthesizer: ManifestSynthesizer::new(api),
            helm,
            kustomize,
            backends: Arc::new(ConfiguredBackends::new(
                config.clone(),
                SigningServices { keys, attestations },
            )),
            work_root: config.work_root.clone(),
            always_generate_provenance: config.always_generate_provenance,
        })
    }

    /// Injects every port; used by embedders and tests.
    pub fn new(
        classifier: EventClassifier,
        synthesizer: ManifestSynthesizer,
        helm: Arc<dyn SourceVerifier>,
        kustomize: Arc<dyn SourceVerifier>,
        backends: Arc<dyn BackendFactory>,
        work_root: impl Into<PathBuf>,
        always_generate_provenance: bool,
    ) -> Self {
        Self {
            classifier,
            synthesizer,
            helm,
            kustomize,
            backends,
            work_root: work_root.into(),
            always_generate_provenance,
        }
    }

    /// Handles one `previous → current` status transition.
    pub async fn handle_event(
        &self,
        previous: &Application,
        current: &Application,
    ) -> Result<CycleOutcome, InterlaceError> {
        let (source, previous_commit_sha, create) = match self.classifier.classify(previous, current) {
            Classification::Skip => return Ok(CycleOutcome::Skipped),
            Classification::Create(source) => (source, String::new(), true),
            Classification::Update {
                source,
                previous_commit_sha,
            } => (source, previous_commit_sha, false),
        };

        let ctx = ApplicationContext::new(source, previous_commit_sha, &self.work_root, Utc::now());
        let event = if create { "create" } else { "update" };
        let span = info_span!("cycle", app = %ctx.app_name(), event);
        let result = self.run_cycle(&ctx, create).instrument(span).await;
        match &result {
            Ok(outcome) => tracing::info!(app = ctx.app_name(), ?outcome, "Cycle finished"),
            Err(e) => tracing::error!(app = ctx.app_name(), "Cycle failed: {}", e),
        }
        result
    }

    async fn run_cycle(
        &self,
        ctx: &ApplicationContext,
        create: bool,
    ) -> Result<CycleOutcome, InterlaceError> {
        let _lock = workspace::prepare(ctx.work_dir())?;

        let verifier = if ctx.is_helm() { &self.helm } else { &self.kustomize };
        let verified = verifier
            .verify_source_material(ctx)
            .instrument(info_span!("verify_source"))
            .await?;
        if !verified {
            return Err(VerificationError::Unverified {
                app: ctx.app_name().to_string(),
            }
            .into());
        }

        let backend = self.backends.create(ctx)?;

        let synthesized = self
            .synthesize(ctx, create, backend.as_ref())
            .instrument(info_span!("synthesize"))
            .await?;
        let Some(outcome) = synthesized.filter(|o| !o.manifest().is_empty()) else {
            return Ok(CycleOutcome::NothingGenerated);
        };
        let changed = outcome.is_changed();

        if changed {
            backend
                .store_manifest_bundle(true)
                .instrument(info_span!("store_bundle"))
                .await?;
        }

        let wants_provenance = changed || self.always_generate_provenance;
        let provenance = wants_provenance && !ctx.is_helm();
        if wants_provenance && ctx.is_helm() {
            tracing::info!(app = ctx.app_name(), "Provenance is not generated for Helm sources");
        }

        if provenance {
            if !changed {
                write_manifest(ctx, outcome.manifest())?;
            }
            backend
                .store_manifest_provenance(ctx.build_started_on(), Utc::now())
                .instrument(info_span!("store_provenance"))
                .await?;
        }

        Ok(if changed {
            CycleOutcome::Stored { provenance }
        } else {
            CycleOutcome::Unchanged { provenance }
        })
    }

    /// `None` when there is nothing to generate.
    async fn synthesize(
        &self,
        ctx: &ApplicationContext,
        create: bool,
        backend: &dyn StorageBackend,
    ) -> Result<Option<DriftOutcome>, InterlaceError> {
        if create {
            return self.initial(ctx).await;
        }

        match backend.get_latest_manifest_content().await {
            Ok(Some(prior)) => self
                .synthesizer
                .generate_with_drift(ctx, &prior)
                .await
                .map(Some),
            Ok(None) => self.initial(ctx).await,
            Err(e) if backend.kind() == StorageKind::Git => {
                tracing::warn!(
                    app = ctx.app_name(),
                    "Could not retrieve stored manifest, generating from scratch: {}",
                    e
                );
                self.initial(ctx).await
            }
            Err(e) => Err(e),
        }
    }

    async fn initial(&self, ctx: &ApplicationContext) -> Result<Option<DriftOutcome>, InterlaceError> {
        Ok(self
            .synthesizer
            .generate_initial(ctx)
            .await?
            .map(DriftOutcome::Changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{OperationState, RevisionHistory};
    use crate::error::{PersistenceError, RetrievalError};
    use crate::manifest::DeploymentApi;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeApi(Value);

    #[async_trait]
    impl DeploymentApi for FakeApi {
        async fn managed_resources(&self, _app_name: &str) -> Result<Value, RetrievalError> {
            Ok(self.0.clone())
        }
    }

    struct FixedVerifier {
        verified: bool,
        calls: Mutex<usize>,
    }

    impl FixedVerifier {
        fn new(verified: bool) -> Arc<Self> {
            Arc::new(Self {
                verified,
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SourceVerifier for FixedVerifier {
        async fn verify_source_material(&self, _ctx: &ApplicationContext) -> Result<bool, InterlaceError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.verified)
        }
    }

    #[derive(Clone, Copy)]
    enum Latest {
        Nothing,
        Same,
        Fails,
    }

    /// Records the backend operations a cycle performs.
    struct RecordingBackends {
        kind: StorageKind,
        latest: Latest,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl RecordingBackends {
        fn new(kind: StorageKind, latest: Latest) -> Arc<Self> {
            Arc::new(Self {
                kind,
                latest,
                calls: Arc::new(Mutex::new(Vec::new())),
            })
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl BackendFactory for RecordingBackends {
        fn create(&self, ctx: &ApplicationContext) -> Result<Box<dyn StorageBackend>, InterlaceError> {
            Ok(Box::new(RecordingBackend {
                ctx: ctx.clone(),
                kind: self.kind,
                latest: self.latest,
                calls: self.calls.clone(),
            }))
        }
    }

    struct RecordingBackend {
        ctx: ApplicationContext,
        kind: StorageKind,
        latest: Latest,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl StorageBackend for RecordingBackend {
        async fn get_latest_manifest_content(&self) -> Result<Option<Vec<u8>>, InterlaceError> {
            self.calls.lock().unwrap().push("get_latest");
            match self.latest {
                Latest::Nothing => Ok(None),
                Latest::Same => {
                    let doc = crate::manifest::ManifestDocument::from_objects(desired_objects()).unwrap();
                    Ok(Some(doc.as_bytes().to_vec()))
                }
                Latest::Fails => Err(RetrievalError::Pull {
                    reference: "stored".to_string(),
                    message: "unreachable".to_string(),
                }
                .into()),
            }
        }

        async fn store_manifest_bundle(&self, source_verified: bool) -> Result<(), InterlaceError> {
            assert!(source_verified);
            if !self.ctx.manifest_path().is_file() {
                return Err(PersistenceError::MissingManifest(self.ctx.manifest_path()).into());
            }
            self.calls.lock().unwrap().push("store_bundle");
            Ok(())
        }

        async fn store_manifest_provenance(
            &self,
            started: DateTime<Utc>,
            finished: DateTime<Utc>,
        ) -> Result<(), InterlaceError> {
            assert!(started <= finished);
            if !self.ctx.manifest_path().is_file() {
                return Err(PersistenceError::MissingManifest(self.ctx.manifest_path()).into());
            }
            self.calls.lock().unwrap().push("store_provenance");
            Ok(())
        }

        fn kind(&self) -> StorageKind {
            self.kind
        }
    }

    fn desired_objects() -> Vec<Value> {
        vec![
            json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "guestbook-ui"}}),
            json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "guestbook-ui"}}),
        ]
    }

    fn response() -> Value {
        json!({
            "items": [
                {"targetState": serde_json::to_string(&desired_objects()[0]).unwrap()},
                {"targetState": serde_json::to_string(&json!({"object": desired_objects()[1]})).unwrap()}
            ]
        })
    }

    fn snapshot(health: &str, sync: &str, chart: &str) -> Application {
        let mut app = Application::default();
        app.metadata.name = "guestbook".to_string();
        app.status.health.status = health.to_string();
        app.status.sync.status = sync.to_string();
        app.status.operation_state = Some(OperationState {
            phase: "Running".to_string(),
        });
        let source = &mut app.status.sync.compared_to.source;
        source.repo_url = "https://github.com/org/apps".to_string();
        source.path = if chart.is_empty() { "guestbook".to_string() } else { String::new() };
        source.target_revision = "main".to_string();
        source.chart = chart.to_string();
        app.status.sync.revision = "c0ffee".to_string();
        app.status.history = vec![RevisionHistory {
            revision: "beef".to_string(),
        }];
        app
    }

    fn create_event(chart: &str) -> (Application, Application) {
        (snapshot("", "", chart), snapshot("Missing", "OutOfSync", chart))
    }

    fn update_event() -> (Application, Application) {
        (snapshot("Healthy", "Synced", ""), snapshot("Healthy", "OutOfSync", ""))
    }

    struct Harness {
        root: TempDir,
        helm: Arc<FixedVerifier>,
        kustomize: Arc<FixedVerifier>,
        backends: Arc<RecordingBackends>,
        orchestrator: Orchestrator,
    }

    fn harness(
        classifier: EventClassifier,
        verified: bool,
        backends: Arc<RecordingBackends>,
        always_generate_provenance: bool,
    ) -> Harness {
        let root = TempDir::new().unwrap();
        let helm = FixedVerifier::new(verified);
        let kustomize = FixedVerifier::new(verified);
        let orchestrator = Orchestrator::new(
            classifier,
            ManifestSynthesizer::new(Arc::new(FakeApi(response()))),
            helm.clone(),
            kustomize.clone(),
            backends.clone(),
            root.path(),
            always_generate_provenance,
        );
        Harness {
            root,
            helm,
            kustomize,
            backends,
            orchestrator,
        }
    }

    fn run(h: &Harness, event: (Application, Application)) -> Result<CycleOutcome, InterlaceError> {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(h.orchestrator.handle_event(&event.0, &event.1))
    }

    #[test]
    fn create_writes_two_documents_and_stores_everything() {
        let h = harness(
            EventClassifier::default(),
            true,
            RecordingBackends::new(StorageKind::Annotation, Latest::Nothing),
            false,
        );

        let (mut prev, mut cur) = create_event("");
        for app in [&mut prev, &mut cur] {
            app.status.sync.compared_to.source.repo_url = "https://git.example/app".to_string();
            app.status.sync.revision = String::new();
        }

        let outcome = run(&h, (prev, cur)).unwrap();
        assert_eq!(outcome, CycleOutcome::Stored { provenance: true });
        assert_eq!(h.backends.calls(), vec!["store_bundle", "store_provenance"]);
        assert_eq!(h.kustomize.calls(), 1);
        assert_eq!(h.helm.calls(), 0);

        let manifest = std::fs::read_to_string(
            h.root.path().join("guestbook/guestbook").join(workspace::MANIFEST_FILE_NAME),
        )
        .unwrap();
        assert_eq!(manifest.matches("---\n").count(), 1);
        assert!(!manifest.contains("object:"));
        assert!(manifest.contains("kind: Service"));
        assert!(manifest.contains("kind: Deployment"));
    }

    #[test]
    fn unverified_source_aborts_before_synthesis() {
        let h = harness(
            EventClassifier::default(),
            false,
            RecordingBackends::new(StorageKind::Annotation, Latest::Nothing),
            true,
        );

        let err = run(&h, create_event("")).unwrap_err();
        assert!(matches!(
            err,
            InterlaceError::Verification(VerificationError::Unverified { .. })
        ));
        assert!(h.backends.calls().is_empty());
        assert!(!h
            .root
            .path()
            .join("guestbook/guestbook")
            .join(workspace::MANIFEST_FILE_NAME)
            .exists());
    }

    #[test]
    fn self_loop_events_are_skipped() {
        let h = harness(
            EventClassifier::new(Some("https://github.com/org/apps.git".to_string())),
            true,
            RecordingBackends::new(StorageKind::Git, Latest::Nothing),
            true,
        );

        assert_eq!(run(&h, create_event("")).unwrap(), CycleOutcome::Skipped);
        assert_eq!(h.kustomize.calls(), 0);
        assert!(h.backends.calls().is_empty());
    }

    #[test]
    fn unqualified_transition_is_skipped() {
        let h = harness(
            EventClassifier::default(),
            true,
            RecordingBackends::new(StorageKind::Annotation, Latest::Nothing),
            false,
        );
        let app = snapshot("Healthy", "Synced", "");
        assert_eq!(run(&h, (app.clone(), app)).unwrap(), CycleOutcome::Skipped);
    }

    #[test]
    fn helm_sources_never_get_provenance() {
        // Helm targets are signed but not attested, even with the always flag set.
        let h = harness(
            EventClassifier::default(),
            true,
            RecordingBackends::new(StorageKind::Annotation, Latest::Nothing),
            true,
        );

        let outcome = run(&h, create_event("nginx")).unwrap();
        assert_eq!(outcome, CycleOutcome::Stored { provenance: false });
        assert_eq!(h.backends.calls(), vec!["store_bundle"]);
        assert_eq!(h.helm.calls(), 1);
        assert_eq!(h.kustomize.calls(), 0);
    }

    #[test]
    fn unchanged_update_stores_nothing() {
        let h = harness(
            EventClassifier::default(),
            true,
            RecordingBackends::new(StorageKind::Oci, Latest::Same),
            false,
        );

        let outcome = run(&h, update_event()).unwrap();
        assert_eq!(outcome, CycleOutcome::Unchanged { provenance: false });
        assert_eq!(h.backends.calls(), vec!["get_latest"]);
    }

    #[test]
    fn unchanged_update_still_attests_when_always_set() {
        let h = harness(
            EventClassifier::default(),
            true,
            RecordingBackends::new(StorageKind::Oci, Latest::Same),
            true,
        );

        let outcome = run(&h, update_event()).unwrap();
        assert_eq!(outcome, CycleOutcome::Unchanged { provenance: true });
        assert_eq!(h.backends.calls(), vec!["get_latest", "store_provenance"]);
    }

    #[test]
    fn update_without_stored_manifest_generates_initial() {
        let h = harness(
            EventClassifier::default(),
            true,
            RecordingBackends::new(StorageKind::Annotation, Latest::Nothing),
            false,
        );

        let outcome = run(&h, update_event()).unwrap();
        assert_eq!(outcome, CycleOutcome::Stored { provenance: true });
        assert_eq!(
            h.backends.calls(),
            vec!["get_latest", "store_bundle", "store_provenance"]
        );
    }

    #[test]
    fn git_retrieval_failure_falls_back_to_initial() {
        let h = harness(
            EventClassifier::default(),
            true,
            RecordingBackends::new(StorageKind::Git, Latest::Fails),
            false,
        );

        let outcome = run(&h, update_event()).unwrap();
        assert_eq!(outcome, CycleOutcome::Stored { provenance: true });
    }

    #[test]
    fn other_retrieval_failures_end_the_cycle() {
        let h = harness(
            EventClassifier::default(),
            true,
            RecordingBackends::new(StorageKind::Oci, Latest::Fails),
            false,
        );

        let err = run(&h, update_event()).unwrap_err();
        assert!(matches!(err, InterlaceError::Retrieval(RetrievalError::Pull { .. })));
        assert_eq!(h.backends.calls(), vec!["get_latest"]);
    }

    #[test]
    fn empty_desired_state_generates_nothing() {
        let root = TempDir::new().unwrap();
        let backends = RecordingBackends::new(StorageKind::Annotation, Latest::Nothing);
        let orchestrator = Orchestrator::new(
            EventClassifier::default(),
            ManifestSynthesizer::new(Arc::new(FakeApi(json!({"items": []})))),
            FixedVerifier::new(true),
            FixedVerifier::new(true),
            backends.clone(),
            root.path(),
            true,
        );

        let (prev, cur) = create_event("");
        let rt = tokio::runtime::Runtime::new().unwrap();
        let outcome = rt.block_on(orchestrator.handle_event(&prev, &cur)).unwrap();
        assert_eq!(outcome, CycleOutcome::NothingGenerated);
        assert!(backends.calls().is_empty());
    }

    #[test]
    fn empty_desired_state_on_update_is_never_attested() {
        let root = TempDir::new().unwrap();
        let backends = RecordingBackends::new(StorageKind::Oci, Latest::Same);
        let orchestrator = Orchestrator::new(
            EventClassifier::default(),
            ManifestSynthesizer::new(Arc::new(FakeApi(json!({"items": []})))),
            FixedVerifier::new(true),
            FixedVerifier::new(true),
            backends.clone(),
            root.path(),
            true,
        );

        let (prev, cur) = update_event();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let outcome = rt.block_on(orchestrator.handle_event(&prev, &cur)).unwrap();
        assert_eq!(outcome, CycleOutcome::NothingGenerated);
        assert_eq!(backends.calls(), vec!["get_latest"]);
        assert!(!root
            .path()
            .join("guestbook/guestbook")
            .join(workspace::MANIFEST_FILE_NAME)
            .exists());
    }
}
