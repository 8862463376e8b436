use std::collections::HashSet;

use super::statement::Material;
use crate::app::ApplicationContext;

/// Canonical form used to compare material URIs: no trailing `/`, always ending in `.git`.
pub fn normalize_uri(uri: &str) -> String {
    let trimmed = uri.trim().trim_end_matches('/');
    if trimmed.ends_with(".git") {
        trimmed.to_string()
    } else {
        format!("{}.git", trimmed)
    }
}

/// The deployed source itself: commit, revision, and path for kustomize.
pub fn kustomize_primary(ctx: &ApplicationContext) -> Material {
    Material::new(
        normalize_uri(ctx.source_repo_url()),
        [
            ("commit", ctx.source_commit_sha()),
            ("revision", ctx.source_revision()),
            ("path", ctx.app_path()),
        ],
    )
}

/// The chart archive digest, revision, and application name for helm.
pub fn helm_primary(ctx: &ApplicationContext, chart_sha256: &str) -> Material {
    Material::new(
        normalize_uri(ctx.source_repo_url()),
        [
            ("sha256hash", chart_sha256),
            ("revision", ctx.source_revision()),
            ("name", ctx.app_name()),
        ],
    )
}

/// Primary material first, then traced materials whose URIs were not already seen.
pub fn assemble(primary: Material, traced: Vec<Material>) -> Vec<Material> {
    let mut seen = HashSet::new();
    seen.insert(normalize_uri(&primary.uri));

    let mut materials = vec![primary];
    for material in traced {
        if seen.insert(normalize_uri(&material.uri)) {
            materials.push(material);
        }
    }
    materials
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_trailing_slash_and_suffix() {
        assert_eq!(normalize_uri("https://h/o/r/"), "https://h/o/r.git");
        assert_eq!(normalize_uri("https://h/o/r.git"), "https://h/o/r.git");
        assert_eq!(normalize_uri("https://h/o/r.git/"), "https://h/o/r.git");
    }

    #[test]
    fn traced_duplicates_of_primary_and_each_other_are_dropped() {
        let primary = Material::new("https://h/o/app", [("commit", "c")]);
        let traced = vec![
            Material::new("https://h/o/app.git", [("revision", "v1")]),
            Material::new("https://h/o/base.git", [("revision", "v1")]),
            Material::new("https://h/o/base/", [("revision", "v2")]),
            Material::new("https://h/o/other", [("revision", "main")]),
        ];

        let materials = assemble(primary, traced);
        let uris: Vec<_> = materials.iter().map(|m| m.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec!["https://h/o/app", "https://h/o/base.git", "https://h/o/other"]
        );
    }
}
