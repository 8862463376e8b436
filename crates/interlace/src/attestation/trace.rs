//! Build trace over a kustomize source tree.
//!
//! Walks the kustomization at the application path, follows local
//! `resources`, `bases` and `components` directories, and records every
//! remote git reference it meets as a material.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::statement::Material;
use crate::git::{is_remote_reference, parse_git_url};

const KUSTOMIZATION_FILES: [&str; 3] = ["kustomization.yaml", "kustomization.yml", "Kustomization"];

#[derive(Debug, Default, Deserialize)]
struct Kustomization {
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    bases: Vec<String>,
    #[serde(default)]
    components: Vec<String>,
}

impl Kustomization {
    fn entries(&self) -> impl Iterator<Item = &String> {
        self.resources
            .iter()
            .chain(self.bases.iter())
            .chain(self.components.iter())
    }
}

/// Traced materials for `start`, which must lie inside `checkout_root`.
///
/// Returns an empty list when there is no kustomization at `start`.
pub fn trace_materials(checkout_root: &Path, start: &Path) -> Vec<Material> {
    let Ok(root) = checkout_root.canonicalize() else {
        return Vec::new();
    };
    let mut visited = HashSet::new();
    let mut materials = Vec::new();
    walk(&root, start, &mut visited, &mut materials);
    materials
}

fn walk(root: &Path, dir: &Path, visited: &mut HashSet<PathBuf>, materials: &mut Vec<Material>) {
    let Ok(dir) = dir.canonicalize() else {
        return;
    };
    if !dir.starts_with(root) || !visited.insert(dir.clone()) {
        return;
    }

    let Some(kustomization) = read_kustomization(&dir) else {
        return;
    };

    let mut local_dirs = Vec::new();
    for entry in kustomization.entries() {
        if !is_remote_reference(entry) {
            local_dirs.push(dir.join(entry));
            continue;
        }
        match parse_git_url(entry) {
            Ok(url) => materials.push(Material::new(
                url.repo_uri(),
                [
                    ("commit", String::new()),
                    ("revision", url.git_ref.clone()),
                    ("path", url.path.clone()),
                ],
            )),
            Err(e) => tracing::debug!(entry = %entry, error = %e, "Skipping unparseable remote reference"),
        }
    }

    // Remote references of this level come before those of nested bases.
    for local in local_dirs.iter().filter(|p| p.is_dir()) {
        walk(root, local, visited, materials);
    }
}

fn read_kustomization(dir: &Path) -> Option<Kustomization> {
    let path = KUSTOMIZATION_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())?;

    let content = std::fs::read_to_string(&path).ok()?;
    match serde_yaml::from_str::<Option<Kustomization>>(&content) {
        Ok(k) => Some(k.unwrap_or_default()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable kustomization");
            None
        }
    }
}
