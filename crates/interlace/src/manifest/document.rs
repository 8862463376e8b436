use serde_json::Value;

/// Separator written between consecutive documents.
pub const DOCUMENT_SEPARATOR: &str = "---\n";

/// Key added around objects by generic marshalling of unstructured resources.
const WRAPPER_KEY: &str = "object";

/// An ordered set of configuration objects and their rendered YAML form.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestDocument {
    objects: Vec<Value>,
    rendered: String,
}

impl ManifestDocument {
    /// Renders `objects` in order, `---` between documents and none after the last.
    pub fn from_objects(objects: Vec<Value>) -> Result<Self, serde_yaml::Error> {
        let docs = objects
            .iter()
            .map(render_object)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rendered: docs.join(DOCUMENT_SEPARATOR),
            objects,
        })
    }

    /// Parses a multi-document YAML bundle.
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        let objects = split_documents(content)
            .into_iter()
            .map(|doc| serde_yaml::from_str::<Value>(&doc))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|v| !v.is_null())
            .collect();
        Self::from_objects(objects)
    }

    pub fn objects(&self) -> &[Value] {
        &self.objects
    }

    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.rendered.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }
}

/// Renders one object as a YAML document ending in a newline.
pub fn render_object(object: &Value) -> Result<String, serde_yaml::Error> {
    let mut yaml = serde_yaml::to_string(object)?;
    if !yaml.ends_with('\n') {
        yaml.push('\n');
    }
    Ok(yaml)
}

/// Removes the single-key `object` wrapper, if present.
pub fn strip_wrapper(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.get(WRAPPER_KEY).is_some_and(Value::is_object) => {
            map.remove(WRAPPER_KEY).unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Splits concatenated YAML on document separator lines, dropping empty documents.
pub fn split_documents(content: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if line.trim_end() == "---" || line.starts_with("--- ") {
            push_document(&mut docs, &mut current);
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    push_document(&mut docs, &mut current);
    docs
}

fn push_document(docs: &mut Vec<String>, current: &mut String) {
    let doc = std::mem::take(current);
    let meaningful = doc
        .lines()
        .any(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'));
    if meaningful {
        docs.push(doc);
    }
}

/// Joins YAML documents with separators, each ending in a newline.
pub fn concat_documents<I, S>(docs: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    docs.into_iter()
        .map(|d| {
            let d = d.as_ref();
            if d.ends_with('\n') {
                d.to_string()
            } else {
                format!("{}\n", d)
            }
        })
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_documents_with_separators_between() {
        let doc = ManifestDocument::from_objects(vec![
            json!({"kind": "Service", "metadata": {"name": "a"}}),
            json!({"kind": "Deployment", "metadata": {"name": "b"}}),
        ])
        .unwrap();

        assert_eq!(doc.rendered().matches("---\n").count(), 1);
        assert!(!doc.rendered().starts_with("---"));
        assert!(!doc.rendered().trim_end().ends_with("---"));
        assert!(doc.rendered().ends_with('\n'));
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn strips_object_wrapper_only() {
        let wrapped = json!({"object": {"kind": "ConfigMap"}});
        assert_eq!(strip_wrapper(wrapped), json!({"kind": "ConfigMap"}));

        let plain = json!({"object": "value"});
        assert_eq!(strip_wrapper(plain.clone()), plain);

        let two_keys = json!({"object": {"a": 1}, "kind": "X"});
        assert_eq!(strip_wrapper(two_keys.clone()), two_keys);
    }

    #[test]
    fn splits_on_separator_lines_and_skips_blank_docs() {
        let content = "---\na: 1\n---\n\n---\n# comment only\n---\nb: 2\n";
        assert_eq!(split_documents(content), vec!["a: 1\n", "b: 2\n"]);
    }

    #[test]
    fn parse_round_trips_rendered_bundle() {
        let doc = ManifestDocument::from_objects(vec![json!({"a": 1}), json!({"b": [1, 2]})]).unwrap();
        let parsed = ManifestDocument::parse(doc.rendered()).unwrap();
        assert_eq!(parsed.objects(), doc.objects());
    }

    #[test]
    fn concat_terminates_every_document() {
        assert_eq!(concat_documents(["a: 1", "b: 2\n"]), "a: 1\n---\nb: 2\n");
    }
}
