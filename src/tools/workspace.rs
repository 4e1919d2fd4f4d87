//! 多仓库工作区：仓库扫描与按仓库写锁
//!
//! 工作区根下每个一级子目录视为一个仓库；WorkspaceDescriptor 在会话开始时扫描一次，
//! 统计文件数、扩展名分布与关键文件，并作为 prompt 上下文。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// 扫描时跳过的目录
pub(crate) const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "bin",
    "obj",
    ".vs",
    ".idea",
    "dist",
    "packages",
];

/// 视为「关键文件」的文件名 / 扩展名
const KEY_FILE_NAMES: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "README.md",
    "Dockerfile",
    "global.json",
    "Directory.Build.props",
    "appsettings.json",
    "Program.cs",
    "Startup.cs",
];
const KEY_FILE_EXTENSIONS: &[&str] = &["sln", "csproj", "fsproj"];

/// 单个仓库的扫描结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryInfo {
    pub path: PathBuf,
    pub total_files: usize,
    pub files_by_extension: BTreeMap<String, usize>,
    /// 相对仓库根的关键文件路径
    pub key_files: Vec<String>,
}

/// 工作区描述：仓库名 -> 仓库信息
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDescriptor {
    pub root: PathBuf,
    pub repositories: BTreeMap<String, RepositoryInfo>,
}

impl WorkspaceDescriptor {
    /// 扫描工作区根；根不存在时返回空描述
    pub fn scan(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let mut repositories = BTreeMap::new();

        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "workspace root not readable");
                return Self { root, repositories };
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if !path.is_dir() || name.starts_with('.') {
                continue;
            }
            repositories.insert(name, scan_repository(&path));
        }

        tracing::info!(
            root = %root.display(),
            repositories = repositories.len(),
            "workspace scanned"
        );
        Self { root, repositories }
    }

    pub fn repository_names(&self) -> Vec<String> {
        self.repositories.keys().cloned().collect()
    }

    /// 文字摘要，用于 prompt
    pub fn summary(&self) -> String {
        if self.repositories.is_empty() {
            return "Workspace is empty (no repositories found).".to_string();
        }
        let mut out = format!("Workspace contains {} repositories:\n", self.repositories.len());
        for (name, info) in &self.repositories {
            let top_ext: Vec<String> = {
                let mut exts: Vec<(&String, &usize)> = info.files_by_extension.iter().collect();
                exts.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
                exts.into_iter()
                    .take(5)
                    .map(|(ext, n)| format!(".{} x{}", ext, n))
                    .collect()
            };
            out.push_str(&format!("- {} ({} files", name, info.total_files));
            if !top_ext.is_empty() {
                out.push_str(&format!("; {}", top_ext.join(", ")));
            }
            out.push(')');
            if !info.key_files.is_empty() {
                let shown: Vec<&str> = info.key_files.iter().take(8).map(|s| s.as_str()).collect();
                out.push_str(&format!(" key files: {}", shown.join(", ")));
            }
            out.push('\n');
        }
        out
    }
}

fn scan_repository(path: &Path) -> RepositoryInfo {
    let mut info = RepositoryInfo {
        path: path.to_path_buf(),
        ..Default::default()
    };
    let walker = WalkDir::new(path)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e.path(), e.file_type().is_dir()));
    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        info.total_files += 1;
        let file_path = entry.path();
        if let Some(ext) = file_path.extension().and_then(|e| e.to_str()) {
            *info
                .files_by_extension
                .entry(ext.to_lowercase())
                .or_insert(0) += 1;
        }
        if is_key_file(file_path) {
            if let Ok(rel) = file_path.strip_prefix(path) {
                info.key_files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    info.key_files.sort();
    info
}

pub(crate) fn is_skipped_dir(path: &Path, is_dir: bool) -> bool {
    is_dir
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| SKIPPED_DIRS.contains(&n))
}

fn is_key_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if KEY_FILE_NAMES.contains(&name) {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| KEY_FILE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// 按仓库的写锁：同一仓库的写操作（写文件、commit、push、构建命令）串行
#[derive(Debug, Default)]
pub struct WorkspaceLocks {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkspaceLocks {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 绝对路径所属仓库名（工作区根下第一段）
    pub fn repository_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        rel.components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
    }

    /// 获取仓库锁；不在任何仓库内的路径共用根锁
    pub fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let key = self.repository_of(path).unwrap_or_default();
        let mut guard = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        let api = dir.path().join("api");
        std::fs::create_dir_all(api.join("src")).unwrap();
        std::fs::create_dir_all(api.join("bin/Debug")).unwrap();
        std::fs::write(api.join("Api.csproj"), "<Project/>").unwrap();
        std::fs::write(api.join("src/Program.cs"), "class P {}").unwrap();
        std::fs::write(api.join("src/Users.cs"), "class U {}").unwrap();
        std::fs::write(api.join("bin/Debug/Api.dll"), "xx").unwrap();
        let web = dir.path().join("web");
        std::fs::create_dir_all(&web).unwrap();
        std::fs::write(web.join("package.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "top-level file").unwrap();
        dir
    }

    #[test]
    fn test_scan_counts_files_and_key_files() {
        let dir = workspace();
        let desc = WorkspaceDescriptor::scan(dir.path());
        assert_eq!(desc.repository_names(), vec!["api".to_string(), "web".to_string()]);

        let api = &desc.repositories["api"];
        assert_eq!(api.total_files, 3);
        assert_eq!(api.files_by_extension.get("cs"), Some(&2));
        assert!(api.key_files.contains(&"Api.csproj".to_string()));
        assert!(api.key_files.contains(&"src/Program.cs".to_string()));

        let summary = desc.summary();
        assert!(summary.contains("2 repositories"));
        assert!(summary.contains("- api (3 files"));
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let desc = WorkspaceDescriptor::scan("/definitely/not/here/bee");
        assert!(desc.repositories.is_empty());
        assert!(desc.summary().contains("empty"));
    }

    #[test]
    fn test_locks_are_per_repository() {
        let dir = workspace();
        let locks = WorkspaceLocks::new(dir.path());
        let root = dir.path().canonicalize().unwrap();
        let a1 = locks.lock_for(&root.join("api/src/Program.cs"));
        let a2 = locks.lock_for(&root.join("api/Api.csproj"));
        let w = locks.lock_for(&root.join("web/package.json"));
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &w));
        assert_eq!(
            locks.repository_of(&root.join("web/package.json")),
            Some("web".to_string())
        );
    }
}
