//! 문서 로더
//!
//! 로컬 폴더의 텍스트 파일을 재귀 수집합니다.
//! .gitignore 패턴을 존중하고, 지원하는 확장자만 수집합니다.
//! 시드 문서 JSON(`{"documents": [{"content", "metadata"}]}`)도 읽습니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use serde::Deserialize;

use super::document::{Document, Metadata};

/// 기본 수집 확장자
const DEFAULT_EXTENSIONS: [&str; 2] = ["txt", "md"];

// ============================================================================
// Loader Configuration
// ============================================================================

/// 로더 설정
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
    /// 수집할 확장자 (대소문자 무시)
    pub extensions: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 10 * 1024 * 1024, // 10MB
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

// ============================================================================
// DocumentLoader
// ============================================================================

/// 텍스트 문서 로더
#[derive(Debug, Clone, Default)]
pub struct DocumentLoader {
    config: LoaderConfig,
}

impl DocumentLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// 대상 파일 경로 수집 (정렬됨)
    ///
    /// 폴더가 없거나 대상 파일이 없으면 빈 목록을 반환합니다.
    pub fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.exists() {
            tracing::warn!("Knowledge directory not found: {:?}", dir);
            return Ok(vec![]);
        }
        if !dir.is_dir() {
            anyhow::bail!("Not a directory: {:?}", dir);
        }

        let mut files = Vec::new();

        // ignore 크레이트로 .gitignore 지원
        let walker = WalkBuilder::new(dir)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            // 파일만 처리
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            if self.should_include(entry.path()) {
                files.push(entry.into_path());
            }
        }

        files.sort();
        tracing::info!("Discovered {} text files in {:?}", files.len(), dir);
        Ok(files)
    }

    /// 폴더의 텍스트 파일을 `source` 메타데이터가 붙은 문서로 로드
    ///
    /// UTF-8이 아닌 파일은 경고 후 건너뜁니다.
    pub fn load_directory(&self, dir: &Path) -> Result<Vec<Document>> {
        let mut documents = Vec::new();

        for path in self.discover(dir)? {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    documents.push(
                        Document::new(content).with_metadata("source", path.display().to_string()),
                    );
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable file {:?}: {}", path, e);
                }
            }
        }

        Ok(documents)
    }

    /// 파일이 필터 조건을 만족하는지 확인
    fn should_include(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        if !self
            .config
            .extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
        {
            return false;
        }

        // 파일 크기 제한
        if self.config.max_file_size > 0 {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if size > self.config.max_file_size {
                tracing::debug!("Skipping large file: {:?} ({} bytes)", path, size);
                return false;
            }
        }

        true
    }
}

// ============================================================================
// Seed Documents (JSON)
// ============================================================================

#[derive(Debug, Deserialize)]
struct SeedFile {
    documents: Vec<SeedDocument>,
}

#[derive(Debug, Deserialize)]
struct SeedDocument {
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

/// 시드 문서 JSON 로드
pub fn load_seed_documents(path: &Path) -> Result<Vec<Document>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Seed file not found: {:?}", path))?;
    let seed: SeedFile = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid seed JSON: {:?}", path))?;

    Ok(seed
        .documents
        .into_iter()
        .map(|d| Document::new(d.content).with_metadata_map(d.metadata))
        .collect())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::MetadataValue;
    use tempfile::TempDir;

    #[test]
    fn test_discovers_text_files_recursively() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("nested/deeper")).unwrap();
        std::fs::write(root.join("a.txt"), "alpha").unwrap();
        std::fs::write(root.join("nested/b.md"), "beta").unwrap();
        std::fs::write(root.join("nested/deeper/c.TXT"), "gamma").unwrap();
        std::fs::write(root.join("nested/image.png"), [0u8, 1, 2]).unwrap();
        std::fs::write(root.join("notes.rs"), "fn main() {}").unwrap();

        let loader = DocumentLoader::default();
        let docs = loader.load_directory(root).unwrap();

        let contents: Vec<&str> = docs.iter().map(Document::content).collect();
        assert_eq!(contents, vec!["alpha", "beta", "gamma"]);
        assert!(docs[0].source().unwrap().ends_with("a.txt"));
    }

    #[test]
    fn test_empty_or_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let loader = DocumentLoader::default();
        assert!(loader.load_directory(temp_dir.path()).unwrap().is_empty());
        assert!(loader
            .load_directory(&temp_dir.path().join("missing"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_skips_non_utf8() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("bad.txt"), [0xffu8, 0xfe, 0xfd]).unwrap();
        std::fs::write(temp_dir.path().join("good.txt"), "ok").unwrap();

        let docs = DocumentLoader::default().load_directory(temp_dir.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content(), "ok");
    }

    #[test]
    fn test_load_seed_documents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("seed.json");
        std::fs::write(
            &path,
            r#"{"documents": [
                {"content": "RAG는 검색 증강 생성입니다.", "metadata": {"source": "seed", "page": 3}},
                {"content": "메타데이터 없음"}
            ]}"#,
        )
        .unwrap();

        let docs = load_seed_documents(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].metadata()["page"], MetadataValue::Integer(3));
        assert!(docs[1].metadata().is_empty());
    }

    #[test]
    fn test_load_seed_documents_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_seed_documents(&path).is_err());
        assert!(load_seed_documents(&temp_dir.path().join("none.json")).is_err());
    }
}
