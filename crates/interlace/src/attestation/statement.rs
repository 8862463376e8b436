//! in-toto statement with a SLSA v0.1 provenance predicate.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

pub const STATEMENT_TYPE: &str = "https://in-toto.io/Statement/v0.1";
pub const SLSA_PREDICATE_TYPE: &str = "https://slsa.dev/provenance/v0.1";
pub const ENTRY_POINT: &str = "argocd-interlace";

/// Algorithm or field name to value, serialized in key order.
pub type DigestSet = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,
    pub predicate_type: String,
    pub subject: Vec<Subject>,
    pub predicate: ProvenancePredicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub digest: DigestSet,
}

impl Subject {
    /// A subject identified by its SHA-256, accepting an `sha256:` prefixed digest.
    pub fn sha256(name: impl Into<String>, digest: &str) -> Self {
        let digest = digest.strip_prefix("sha256:").unwrap_or(digest);
        Self {
            name: name.into(),
            digest: DigestSet::from([("sha256".to_string(), digest.to_string())]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenancePredicate {
    pub builder: Builder,
    pub recipe: Recipe,
    pub metadata: Metadata,
    pub materials: Vec<Material>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builder {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    #[serde(rename = "type")]
    pub recipe_type: String,
    pub entry_point: String,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(serialize_with = "rfc3339")]
    pub build_started_on: DateTime<Utc>,
    #[serde(serialize_with = "rfc3339")]
    pub build_finished_on: DateTime<Utc>,
    pub reproducible: bool,
}

fn rfc3339<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub uri: String,
    pub digest: DigestSet,
}

impl Material {
    pub fn new<I, K, V>(uri: impl Into<String>, digest: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            uri: uri.into(),
            digest: digest
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Statement {
    pub fn provenance(
        subject: Subject,
        materials: Vec<Material>,
        argocd_namespace: &str,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    ) -> Self {
        Self {
            statement_type: STATEMENT_TYPE.to_string(),
            predicate_type: SLSA_PREDICATE_TYPE.to_string(),
            subject: vec![subject],
            predicate: ProvenancePredicate {
                builder: Builder {
                    id: ENTRY_POINT.to_string(),
                },
                recipe: Recipe {
                    recipe_type: ENTRY_POINT.to_string(),
                    entry_point: ENTRY_POINT.to_string(),
                    arguments: vec![format!("-n {}", argocd_namespace)],
                },
                metadata: Metadata {
                    build_started_on: started,
                    build_finished_on: finished,
                    reproducible: true,
                },
                materials,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn subject_strips_algorithm_prefix() {
        let subject = Subject::sha256("image", "sha256:abc");
        assert_eq!(subject.digest["sha256"], "abc");
        assert_eq!(Subject::sha256("file", "def").digest["sha256"], "def");
    }

    #[test]
    fn statement_serializes_in_toto_field_names() {
        let started = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let statement = Statement::provenance(
            Subject::sha256("manifest.yaml", "00"),
            vec![Material::new("https://github.com/o/r.git", [("commit", "c1")])],
            "argocd",
            started,
            started,
        );
        let json = serde_json::to_value(&statement).unwrap();

        assert_eq!(json["_type"], STATEMENT_TYPE);
        assert_eq!(json["predicateType"], SLSA_PREDICATE_TYPE);
        assert_eq!(json["predicate"]["recipe"]["entryPoint"], "argocd-interlace");
        assert_eq!(json["predicate"]["recipe"]["arguments"][0], "-n argocd");
        assert_eq!(json["predicate"]["metadata"]["reproducible"], true);
        assert_eq!(
            json["predicate"]["metadata"]["buildStartedOn"],
            "2024-01-02T03:04:05Z"
        );
        assert_eq!(json["predicate"]["materials"][0]["digest"]["commit"], "c1");
    }
}
