//! 路径与文件类型校验

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use super::{SandboxViolation, SecurityPolicy};

/// 视为二进制 / 媒体的扩展名（小写）
const BINARY_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "bin", "obj", "o", "a", "lib", "pdb", "class", "jar", "war",
    "pyc", "wasm", "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "nupkg", "png", "jpg",
    "jpeg", "gif", "bmp", "ico", "tiff", "webp", "psd", "mp3", "wav", "flac", "ogg", "mp4",
    "avi", "mov", "mkv", "webm", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "ttf",
    "otf", "woff", "woff2", "db", "sqlite", "iso", "dmg",
];

impl SecurityPolicy {
    /// 校验并解析路径，成功返回规范化后的绝对路径
    ///
    /// 原始字符串中只要出现 `..` 段即拒绝，即便解析结果仍在工作区内。
    pub fn validate_path(&self, raw: &str) -> Result<PathBuf, SandboxViolation> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.contains('\0') {
            return Err(SandboxViolation::InvalidPath(raw.to_string()));
        }
        if has_parent_segment(trimmed) {
            return Err(SandboxViolation::ParentTraversal(trimmed.to_string()));
        }

        let candidate = Path::new(trimmed);
        let absolute = if candidate.is_absolute() {
            normalize_lexically(candidate)
        } else {
            normalize_lexically(&self.workspace_root.join(candidate))
        };
        let resolved = resolve_existing_prefix(&absolute);

        if self
            .denied_directories
            .iter()
            .any(|d| resolved.starts_with(d) || absolute.starts_with(d))
        {
            return Err(SandboxViolation::DeniedDirectory(trimmed.to_string()));
        }
        if !resolved.starts_with(&self.workspace_root) {
            return Err(SandboxViolation::OutsideWorkspace(trimmed.to_string()));
        }
        Ok(resolved)
    }

    /// 扩展名不在二进制 / 媒体列表中即视为文本
    pub fn is_text_file(&self, path: impl AsRef<Path>) -> bool {
        is_text_path(path.as_ref())
    }

    /// validate_path + is_text_file，读写文本文件前使用
    pub fn validate_text_path(&self, raw: &str) -> Result<PathBuf, SandboxViolation> {
        let resolved = self.validate_path(raw)?;
        if !is_text_path(&resolved) {
            return Err(SandboxViolation::BinaryFile(raw.trim().to_string()));
        }
        Ok(resolved)
    }
}

pub(crate) fn is_text_path(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            let ext = ext.to_ascii_lowercase();
            !BINARY_EXTENSIONS.contains(&ext.as_str())
        }
        None => true,
    }
}

/// 任一分隔符（/ 或 \）切出的段等于 ".."，或包含 URL 编码的 "%2e%2e"
fn has_parent_segment(raw: &str) -> bool {
    raw.split(['/', '\\']).any(|seg| seg.trim() == "..")
        || raw.to_ascii_lowercase().contains("%2e%2e")
}

/// 去掉 `.` 段（`..` 已在上游拒绝）
fn normalize_lexically(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// 规范化最长的已存在前缀，再拼回尚不存在的尾部（写入新文件时路径还不存在）
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return out;
        }
        let name = existing.file_name().map(|n| n.to_os_string());
        let parent = existing.parent().map(Path::to_path_buf);
        match (name, parent) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}
