//! Filesystem tools confined to a set of root directories.

use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glob::Pattern;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use super::{GenericToolExecutor, ToolCallContext, ToolExecutor, arg_str, object_schema, require_str};
use crate::{base::types::Res, service::llm::ToolDescriptor};

/// Largest file `read_file` will load.
pub const MAX_READ_BYTES: u64 = 25 * 1024 * 1024;

const ALLOWED_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "md", "txt", "json", "yaml", "yml", "sql", "sh", "html", "css", "cpp", "c", "h", "go", "rs", "java", "php", "rb", "swift", "kt", "scala", "dockerfile",
    "gitignore", "env", "toml", "ini", "cfg", "csv", "log",
];

const LANGUAGES: &[(&str, &[&str])] = &[
    ("python", &["py"]),
    ("javascript", &["js", "jsx"]),
    ("typescript", &["ts", "tsx"]),
    ("java", &["java"]),
    ("cpp", &["cpp", "cc", "cxx"]),
    ("c", &["c"]),
    ("go", &["go"]),
    ("rust", &["rs"]),
    ("php", &["php"]),
    ("ruby", &["rb"]),
    ("swift", &["swift"]),
    ("kotlin", &["kt"]),
    ("scala", &["scala"]),
];

/// Directories `analyze_codebase` never descends into, besides hidden ones.
const IGNORED_DIRS: &[&str] = &["node_modules", "__pycache__", "target"];

/// How many entries `analyze_codebase` reports as largest and most recent.
const ANALYSIS_TOP: usize = 10;

// Structs.

/// Reads and writes text files below the configured roots.
pub struct FilesystemTools {
    roots: Vec<PathBuf>,
}

impl FilesystemTools {
    /// Creates the tools; roots that do not exist are skipped.
    pub fn new(roots: &[PathBuf]) -> Self {
        let roots = roots
            .iter()
            .filter_map(|root| match std::fs::canonicalize(root) {
                Ok(root) => Some(root),
                Err(err) => {
                    warn!("Skipping filesystem root `{}`: {}", root.display(), err);
                    None
                }
            })
            .collect::<Vec<_>>();

        info!("Filesystem tools confined to {:?}", roots);

        Self { roots }
    }

    /// Resolves `raw` (relative to the first root) and checks that it stays inside a root.
    ///
    /// Paths that do not exist yet are resolved through their nearest existing ancestor.
    pub fn resolve(&self, raw: &str) -> Res<PathBuf> {
        let base = self.roots.first().ok_or_else(|| anyhow!("No filesystem roots are configured."))?;

        let candidate = if Path::new(raw).is_absolute() { PathBuf::from(raw) } else { base.join(raw) };

        let mut existing = candidate.as_path();
        let mut missing = Vec::new();

        while !existing.exists() {
            missing.push(existing.file_name().ok_or_else(|| anyhow!("Invalid path `{raw}`."))?.to_os_string());
            existing = existing.parent().ok_or_else(|| anyhow!("Invalid path `{raw}`."))?;
        }

        let mut resolved = std::fs::canonicalize(existing)?;

        for part in missing.iter().rev() {
            if Path::new(part).components().any(|c| !matches!(c, Component::Normal(_))) {
                return Err(anyhow!("Access denied: path `{raw}` is not allowed."));
            }

            resolved.push(part);
        }

        if self.roots.iter().any(|root| resolved.starts_with(root)) {
            Ok(resolved)
        } else {
            Err(anyhow!("Access denied: path `{raw}` is outside the allowed directories."))
        }
    }

    #[instrument(skip_all)]
    async fn read_file(&self, arguments: &Value) -> Res<Value> {
        let path = self.resolve(require_str(arguments, "path")?)?;
        ensure_allowed_extension(&path)?;

        let metadata = tokio::fs::metadata(&path).await.with_context(|| format!("File not found: {}", path.display()))?;

        if !metadata.is_file() {
            return Err(anyhow!("Not a file: {}", path.display()));
        }

        if metadata.len() > MAX_READ_BYTES {
            return Err(anyhow!("File too large: {} bytes (max {} bytes)", metadata.len(), MAX_READ_BYTES));
        }

        let bytes = tokio::fs::read(&path).await?;
        let content = String::from_utf8(bytes).map_err(|_| anyhow!("File contains binary data: {}", path.display()))?;

        Ok(json!({
            "success": true,
            "file_path": path.display().to_string(),
            "file_name": file_name(&path),
            "file_size": metadata.len(),
            "file_extension": extension(&path),
            "modified_time": modified_time(&metadata),
            "line_count": content.lines().count(),
            "char_count": content.chars().count(),
            "content": content,
        }))
    }

    #[instrument(skip_all)]
    async fn write_file(&self, arguments: &Value) -> Res<Value> {
        let path = self.resolve(require_str(arguments, "path")?)?;
        let content = arguments.get("content").and_then(Value::as_str).ok_or_else(|| anyhow!("Missing required argument `content`."))?;
        let overwrite = arguments.get("overwrite").and_then(Value::as_bool).unwrap_or(false);

        ensure_allowed_extension(&path)?;

        if path.exists() && !overwrite {
            return Err(anyhow!("File already exists: {} (set `overwrite` to replace it)", path.display()));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, content).await?;

        Ok(json!({
            "success": true,
            "file_path": path.display().to_string(),
            "file_size": content.len(),
            "overwritten": overwrite,
        }))
    }

    #[instrument(skip_all)]
    async fn list_files(&self, arguments: &Value) -> Res<Value> {
        let directory = self.resolve(arg_str(arguments, "directory", Some(".")).unwrap_or("."))?;
        let pattern = arg_str(arguments, "pattern", Some("*")).unwrap_or("*");
        let recursive = arguments.get("recursive").and_then(Value::as_bool).unwrap_or(false);
        let matcher = Pattern::new(pattern).with_context(|| format!("Invalid pattern `{pattern}`"))?;

        if !directory.is_dir() {
            return Err(anyhow!("Path is not a directory: {}", directory.display()));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let root = directory.clone();
        let mut files = tokio::task::spawn_blocking(move || collect_files(&root, max_depth, &matcher)).await?;

        files.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));

        Ok(json!({
            "success": true,
            "directory": directory.display().to_string(),
            "pattern": pattern,
            "recursive": recursive,
            "file_count": files.len(),
            "files": files,
        }))
    }

    #[instrument(skip_all)]
    async fn analyze_codebase(&self, arguments: &Value) -> Res<Value> {
        let directory = self.resolve(arg_str(arguments, "directory", Some(".")).unwrap_or("."))?;
        let languages = arguments
            .get("languages")
            .and_then(Value::as_array)
            .map(|l| l.iter().filter_map(Value::as_str).map(str::to_lowercase).collect::<Vec<_>>())
            .unwrap_or_default();

        if !directory.is_dir() {
            return Err(anyhow!("Directory not found: {}", directory.display()));
        }

        let root = directory.clone();
        let analysis = tokio::task::spawn_blocking(move || analyze(&root, &languages)).await?;

        Ok(analysis)
    }

    #[instrument(skip_all)]
    async fn get_file_info(&self, arguments: &Value) -> Res<Value> {
        let path = self.resolve(require_str(arguments, "path")?)?;
        let metadata = tokio::fs::metadata(&path).await.with_context(|| format!("Path not found: {}", path.display()))?;

        Ok(json!({
            "success": true,
            "file_path": path.display().to_string(),
            "file_name": file_name(&path),
            "is_file": metadata.is_file(),
            "is_directory": metadata.is_dir(),
            "size": metadata.len(),
            "extension": extension(&path),
            "modified_time": modified_time(&metadata),
            "is_allowed": is_allowed_extension(&path),
        }))
    }
}

impl From<FilesystemTools> for ToolExecutor {
    fn from(tools: FilesystemTools) -> Self {
        Self::new(Arc::new(tools))
    }
}

#[async_trait]
impl GenericToolExecutor for FilesystemTools {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "read_file".to_string(),
                description: "Read a text file (up to 25 MB).".to_string(),
                parameters: object_schema(json!({ "path": { "type": "string" } }), &["path"]),
            },
            ToolDescriptor {
                name: "write_file".to_string(),
                description: "Write a text file, creating parent directories.".to_string(),
                parameters: object_schema(
                    json!({
                        "path": { "type": "string" },
                        "content": { "type": "string" },
                        "overwrite": { "type": "boolean", "description": "Replace an existing file (default false)." },
                    }),
                    &["path", "content"],
                ),
            },
            ToolDescriptor {
                name: "list_files".to_string(),
                description: "List files in a directory, optionally matching a glob pattern such as `*.rs`.".to_string(),
                parameters: object_schema(
                    json!({
                        "directory": { "type": "string" },
                        "pattern": { "type": "string" },
                        "recursive": { "type": "boolean" },
                    }),
                    &[],
                ),
            },
            ToolDescriptor {
                name: "analyze_codebase".to_string(),
                description: "Summarize a source tree: files and lines per language, file types, largest and most recent files.".to_string(),
                parameters: object_schema(
                    json!({
                        "directory": { "type": "string" },
                        "languages": { "type": "array", "items": { "type": "string" }, "description": "Only count these languages, e.g. `rust`." },
                    }),
                    &[],
                ),
            },
            ToolDescriptor {
                name: "get_file_info".to_string(),
                description: "Get size, type and modification time of a path.".to_string(),
                parameters: object_schema(json!({ "path": { "type": "string" } }), &["path"]),
            },
        ]
    }

    async fn execute(&self, name: &str, arguments: &Value, _context: &ToolCallContext) -> Res<Value> {
        match name {
            "read_file" => self.read_file(arguments).await,
            "write_file" => self.write_file(arguments).await,
            "list_files" => self.list_files(arguments).await,
            "analyze_codebase" => self.analyze_codebase(arguments).await,
            "get_file_info" => self.get_file_info(arguments).await,
            _ => Err(anyhow!("Unknown tool: {name}")),
        }
    }
}

// Helpers.

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

fn extension(path: &Path) -> String {
    path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default()
}

fn is_allowed_extension(path: &Path) -> bool {
    let ext = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        // Dotfiles such as `.gitignore` have no extension, only a name.
        None => file_name(path).trim_start_matches('.').to_lowercase(),
    };

    ALLOWED_EXTENSIONS.contains(&ext.as_str())
}

fn ensure_allowed_extension(path: &Path) -> Res<()> {
    if is_allowed_extension(path) {
        Ok(())
    } else {
        Err(anyhow!("File type not allowed: {}", path.display()))
    }
}

fn modified_time(metadata: &std::fs::Metadata) -> Option<String> {
    metadata.modified().ok().map(|t| DateTime::<Utc>::from(t).to_rfc3339())
}

fn collect_files(directory: &Path, max_depth: usize, matcher: &Pattern) -> Vec<Value> {
    WalkDir::new(directory)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && matcher.matches(&e.file_name().to_string_lossy()))
        .filter_map(|e| {
            let metadata = e.metadata().ok()?;
            let path = e.path();

            Some(json!({
                "name": file_name(path),
                "path": path.strip_prefix(directory).unwrap_or(path).display().to_string(),
                "size": metadata.len(),
                "extension": extension(path),
                "modified_time": modified_time(&metadata),
                "is_allowed": is_allowed_extension(path),
            }))
        })
        .collect()
}

fn is_ignored(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();

    entry.depth() > 0 && (name.starts_with('.') || (entry.file_type().is_dir() && IGNORED_DIRS.contains(&&*name)))
}

fn language_of(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();

    LANGUAGES.iter().find(|(_, extensions)| extensions.contains(&ext.as_str())).map(|(language, _)| *language)
}

struct AnalyzedFile {
    path: String,
    size: u64,
    lines: usize,
    language: Option<&'static str>,
    modified: Option<DateTime<Utc>>,
}

impl AnalyzedFile {
    fn to_json(&self) -> Value {
        json!({
            "path": self.path,
            "size": self.size,
            "lines": self.lines,
            "language": self.language,
            "modified": self.modified.map(|m| m.to_rfc3339()),
        })
    }
}

/// Walks `directory`, skipping hidden and dependency directories, and summarizes what it finds.
fn analyze(directory: &Path, languages: &[String]) -> Value {
    let mut per_language = BTreeMap::<&str, (usize, usize, u64)>::new();
    let mut file_types = BTreeMap::<String, usize>::new();
    let mut analyzed = Vec::new();
    let (mut total_files, mut total_lines, mut total_size) = (0usize, 0usize, 0u64);

    let entries = WalkDir::new(directory).follow_links(false).into_iter().filter_entry(|e| !is_ignored(e)).filter_map(|e| e.ok());

    for entry in entries.filter(|e| e.file_type().is_file()) {
        let Ok(metadata) = entry.metadata() else { continue };
        let path = entry.path();

        *file_types.entry(extension(path)).or_default() += 1;
        total_files += 1;
        total_size += metadata.len();

        if !is_allowed_extension(path) || metadata.len() > MAX_READ_BYTES {
            continue;
        }

        let Ok(content) = std::fs::read_to_string(path) else { continue };
        let lines = content.lines().count();
        total_lines += lines;

        let language = language_of(path);

        if let Some(language) = language.filter(|l| languages.is_empty() || languages.iter().any(|wanted| wanted.as_str() == *l)) {
            let counts = per_language.entry(language).or_default();
            counts.0 += 1;
            counts.1 += lines;
            counts.2 += metadata.len();
        }

        analyzed.push(AnalyzedFile {
            path: path.strip_prefix(directory).unwrap_or(path).display().to_string(),
            size: metadata.len(),
            lines,
            language,
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    analyzed.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
    let largest_files = analyzed.iter().take(ANALYSIS_TOP).map(AnalyzedFile::to_json).collect::<Vec<_>>();

    analyzed.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    let recent_files = analyzed.iter().take(ANALYSIS_TOP).map(AnalyzedFile::to_json).collect::<Vec<_>>();

    let languages = per_language
        .into_iter()
        .map(|(language, (files, lines, size))| (language.to_string(), json!({ "files": files, "lines": lines, "size": size })))
        .collect::<serde_json::Map<_, _>>();

    json!({
        "success": true,
        "directory": directory.display().to_string(),
        "analyzed_at": Utc::now().to_rfc3339(),
        "languages": languages,
        "file_types": file_types,
        "total_files": total_files,
        "total_lines": total_lines,
        "total_size": total_size,
        "largest_files": largest_files,
        "recent_files": recent_files,
    })
}

// Tests.
