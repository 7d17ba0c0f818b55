//! Repository description handed to candidate sources.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Files listed in a context; the count covers all of them.
const MAX_LISTED_FILES: usize = 200;
const MAX_README_CHARS: usize = 4_000;

/// What a candidate source knows about the repository it proposes for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryContext {
    /// `owner/name`.
    pub repository: String,
    pub default_branch: String,
    /// Most common language by file extension, `"unknown"` when nothing matched.
    pub language: String,
    pub file_count: usize,
    /// Sorted relative paths, at most [`MAX_LISTED_FILES`].
    pub files: Vec<String>,
    pub readme_excerpt: Option<String>,
    /// Texts of recalled memories, most relevant first.
    pub memories: Vec<String>,
}

/// Describe the working copy at `root`.
pub fn gather_context(
    root: &Path,
    repository: &str,
    default_branch: &str,
    memories: Vec<String>,
) -> Result<RepositoryContext> {
    let mut files = Vec::new();
    let mut languages: BTreeMap<&'static str, usize> = BTreeMap::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");
    for entry in walker {
        let entry = entry.context("walk working copy")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .context("entry outside working copy")?;
        if let Some(language) = relative
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(language_for_extension)
        {
            *languages.entry(language).or_default() += 1;
        }
        files.push(relative.to_string_lossy().replace('\\', "/"));
    }

    let language = languages
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map_or("unknown", |(language, _)| *language)
        .to_string();
    let file_count = files.len();
    files.truncate(MAX_LISTED_FILES);

    Ok(RepositoryContext {
        repository: repository.to_string(),
        default_branch: default_branch.to_string(),
        language,
        file_count,
        files,
        readme_excerpt: read_readme(root),
        memories,
    })
}

fn read_readme(root: &Path) -> Option<String> {
    ["README.md", "README.rst", "README.txt", "README"]
        .iter()
        .find_map(|name| fs::read_to_string(root.join(name)).ok())
        .map(|text| text.chars().take(MAX_README_CHARS).collect::<String>())
        .filter(|text| !text.trim().is_empty())
}

fn language_for_extension(ext: &str) -> Option<&'static str> {
    let language = match ext {
        "py" => "Python",
        "rs" => "Rust",
        "js" | "mjs" | "cjs" => "JavaScript",
        "ts" | "tsx" => "TypeScript",
        "go" => "Go",
        "java" => "Java",
        "rb" => "Ruby",
        "c" | "h" => "C",
        "cc" | "cpp" | "hpp" => "C++",
        "sh" => "Shell",
        _ => return None,
    };
    Some(language)
}
