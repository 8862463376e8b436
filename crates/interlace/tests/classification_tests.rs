//! Table-driven tests for status-transition classification.

use interlace::app::{Application, OperationState, RevisionHistory};
use interlace::{Classification, EventClassifier};

/// Status fields of one application snapshot: (health, phase, sync).
type Status = (&'static str, Option<&'static str>, &'static str);

#[derive(Debug, PartialEq)]
enum Expected {
    Skip,
    Create,
    Update,
}

struct ClassificationCase {
    name: &'static str,
    previous: Status,
    current: Status,
    expected: Expected,
}

const CASES: &[ClassificationCase] = &[
    ClassificationCase {
        name: "first_deployment",
        previous: ("", Some("Running"), ""),
        current: ("Missing", Some("Running"), "OutOfSync"),
        expected: Expected::Create,
    },
    ClassificationCase {
        name: "synced_goes_out_of_sync",
        previous: ("Healthy", Some("Running"), "Synced"),
        current: ("Healthy", Some("Running"), "OutOfSync"),
        expected: Expected::Update,
    },
    ClassificationCase {
        name: "degraded_still_updates",
        previous: ("Degraded", Some("Running"), "Synced"),
        current: ("Progressing", Some("Running"), "OutOfSync"),
        expected: Expected::Update,
    },
    ClassificationCase {
        name: "sync_completed",
        previous: ("Healthy", Some("Running"), "OutOfSync"),
        current: ("Healthy", Some("Succeeded"), "Synced"),
        expected: Expected::Skip,
    },
    ClassificationCase {
        name: "no_operation_state",
        previous: ("Healthy", None, "Synced"),
        current: ("Healthy", None, "OutOfSync"),
        expected: Expected::Skip,
    },
    ClassificationCase {
        name: "create_needs_missing_health",
        previous: ("", Some("Running"), ""),
        current: ("Healthy", Some("Running"), "OutOfSync"),
        expected: Expected::Skip,
    },
    ClassificationCase {
        name: "unchanged_status",
        previous: ("Healthy", Some("Running"), "Synced"),
        current: ("Healthy", Some("Running"), "Synced"),
        expected: Expected::Skip,
    },
];

fn snapshot(status: Status, repo_url: &str) -> Application {
    let (health, phase, sync) = status;
    let mut app = Application::default();
    app.metadata.name = "guestbook".to_string();
    app.status.health.status = health.to_string();
    app.status.sync.status = sync.to_string();
    app.status.sync.revision = "c0ffee".to_string();
    app.status.operation_state = phase.map(|p| OperationState {
        phase: p.to_string(),
    });
    app.status.sync.compared_to.source.repo_url = repo_url.to_string();
    app.status.sync.compared_to.source.path = "guestbook".to_string();
    app.status.history = vec![RevisionHistory {
        revision: "beef".to_string(),
    }];
    app
}

fn kind(classification: &Classification) -> Expected {
    match classification {
        Classification::Skip => Expected::Skip,
        Classification::Create(_) => Expected::Create,
        Classification::Update { .. } => Expected::Update,
    }
}

#[test]
fn classification_table() {
    let classifier = EventClassifier::new(Some("https://github.com/org/manifests".to_string()));
    for case in CASES {
        let previous = snapshot(case.previous, "https://github.com/org/apps");
        let current = snapshot(case.current, "https://github.com/org/apps");
        let result = classifier.classify(&previous, &current);
        assert_eq!(kind(&result), case.expected, "{}", case.name);
    }
}

#[test]
fn events_from_the_manifest_repository_are_always_skipped() {
    let classifier = EventClassifier::new(Some("https://github.com/org/manifests.git".to_string()));
    for case in CASES {
        let previous = snapshot(case.previous, "https://github.com/org/manifests/");
        let current = snapshot(case.current, "https://github.com/org/manifests/");
        assert!(
            matches!(classifier.classify(&previous, &current), Classification::Skip),
            "{}",
            case.name
        );
    }
}

#[test]
fn update_reports_previous_and_current_commits() {
    let classifier = EventClassifier::default();
    let previous = snapshot(CASES[1].previous, "https://github.com/org/apps");
    let current = snapshot(CASES[1].current, "https://github.com/org/apps");

    match classifier.classify(&previous, &current) {
        Classification::Update {
            source,
            previous_commit_sha,
        } => {
            assert_eq!(previous_commit_sha, "beef");
            assert_eq!(source.commit_sha, "c0ffee");
            assert_eq!(source.app_path, "guestbook");
        }
        other => panic!("expected Update, got {other:?}"),
    }
}
