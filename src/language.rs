use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A language and the file extensions that identify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Language {
    #[serde(skip)]
    pub id: usize,
    pub name: String,
    pub extensions: Vec<String>,
}

impl Language {
    fn new(id: usize, name: String, extensions: Vec<String>) -> Self {
        let extensions = extensions.into_iter().map(normalize_extension).collect();
        Self { id, name, extensions }
    }
}

fn normalize_extension(ext: String) -> String {
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

/// Extension of the last path component, including the leading dot.
///
/// `src/main.go` gives `.go`, `.gitignore` gives `.gitignore`, `Makefile` gives nothing.
pub fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rfind('.').map(|idx| &name[idx..])
}

/// Immutable extension -> language lookup built from configuration.
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    languages: Vec<Arc<Language>>,
    by_extension: HashMap<String, Arc<Language>>,
}

impl LanguageRegistry {
    /// Builds the registry from `(name, extensions)` pairs. Ids follow insertion order;
    /// an extension claimed twice stays with the first language.
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut registry = Self::default();
        for (name, extensions) in entries {
            let language = Arc::new(Language::new(registry.languages.len(), name, extensions));
            for ext in &language.extensions {
                registry
                    .by_extension
                    .entry(ext.clone())
                    .or_insert_with(|| Arc::clone(&language));
            }
            registry.languages.push(language);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    pub fn languages(&self) -> &[Arc<Language>] {
        &self.languages
    }

    pub fn by_extension(&self, ext: &str) -> Option<&Arc<Language>> {
        self.by_extension.get(ext)
    }

    pub fn for_path(&self, path: &str) -> Option<&Arc<Language>> {
        extension_of(path).and_then(|ext| self.by_extension(ext))
    }
}
