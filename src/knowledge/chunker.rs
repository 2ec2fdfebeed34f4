//! Text Chunking Module
//!
//! 재귀 문자 분할기: 문단 → 줄 → 문장 → 단어 → 문자 순으로
//! 구분자를 낮춰가며 청크 크기에 맞추고, 인접 청크 사이에 오버랩을 유지합니다.
//! 크기는 바이트가 아닌 문자(char) 수 기준입니다.

use crate::error::ConfigError;

use super::document::Document;

/// 기본 청크 크기 (문자 수)
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// 기본 오버랩 (문자 수)
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// 분할 구분자 (우선순위 순). 마지막 빈 문자열은 문자 단위 분할
const SEPARATORS: [&str; 6] = ["\n\n", "\n", "。", ". ", " ", ""];

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 오버랩 크기 (문자 수)
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;

    /// 문서 분할 (원본 메타데이터 + `chunk_index`)
    fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        documents
            .iter()
            .flat_map(|doc| {
                self.chunk(doc.content())
                    .into_iter()
                    .enumerate()
                    .map(move |(i, chunk)| {
                        Document::new(chunk)
                            .with_metadata_map(doc.metadata().clone())
                            .with_metadata("chunk_index", i)
                    })
            })
            .collect()
    }
}

// ============================================================================
// RecursiveChunker
// ============================================================================

/// 재귀 문자 분할기
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    config: ChunkConfig,
}

impl Default for RecursiveChunker {
    fn default() -> Self {
        Self::new(ChunkConfig::default())
    }
}

impl RecursiveChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // 텍스트에 존재하는 첫 구분자 선택
        let mut separator = "";
        let mut rest: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() || text.contains(sep) {
                separator = sep;
                rest = &separators[i + 1..];
                break;
            }
        }

        let splits: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            // 구분자는 앞 조각 끝에 남겨 원문 그대로 이어 붙일 수 있게 함
            text.split_inclusive(separator)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut good: Vec<String> = Vec::new();

        for split in splits {
            if char_len(&split) < self.config.chunk_size {
                good.push(split);
                continue;
            }

            if !good.is_empty() {
                chunks.extend(self.merge_splits(&good));
                good.clear();
            }

            if rest.is_empty() {
                chunks.push(split);
            } else {
                chunks.extend(self.split_recursive(&split, rest));
            }
        }

        if !good.is_empty() {
            chunks.extend(self.merge_splits(&good));
        }

        chunks
    }

    /// 작은 조각을 청크 크기까지 합치고 다음 청크에 오버랩을 남김
    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut docs = Vec::new();
        let mut current: std::collections::VecDeque<&str> = std::collections::VecDeque::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(split);

            if total + len > size && !current.is_empty() {
                push_joined(&mut docs, &current);

                // 오버랩 크기 이하가 되거나 새 조각이 들어갈 때까지 앞에서 제거
                while total > overlap || (total > 0 && total + len > size) {
                    let Some(first) = current.pop_front() else {
                        break;
                    };
                    total -= char_len(first);
                }
            }

            current.push_back(split);
            total += len;
        }

        push_joined(&mut docs, &current);
        docs
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }
        self.split_recursive(text, &SEPARATORS)
    }

    fn name(&self) -> &'static str {
        "recursive"
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_joined(docs: &mut Vec<String>, parts: &std::collections::VecDeque<&str>) {
    let joined: String = parts.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> RecursiveChunker {
        RecursiveChunker::new(ChunkConfig::new(size, overlap).unwrap())
    }

    #[test]
    fn test_character_windows_keep_overlap() {
        let chunks = chunker(4, 2).chunk("abcdefghij");
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh", "ghij"]);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = RecursiveChunker::default().chunk("짧은 문서입니다.");
        assert_eq!(chunks, vec!["짧은 문서입니다."]);
    }

    #[test]
    fn test_empty_text() {
        assert!(RecursiveChunker::default().chunk("   \n\n ").is_empty());
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let text = "first paragraph here\n\nsecond paragraph here";
        let chunks = chunker(25, 0).chunk(text);
        assert_eq!(chunks, vec!["first paragraph here", "second paragraph here"]);
    }

    #[test]
    fn test_falls_back_to_words() {
        let text = "one two three four five six";
        let chunks = chunker(10, 0).chunk(text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_sentence_split_keeps_punctuation() {
        let text = "Alpha beta. Gamma delta. Epsilon.";
        let chunks = chunker(14, 0).chunk(text);
        assert_eq!(chunks, vec!["Alpha beta.", "Gamma delta.", "Epsilon."]);

        let text = "첫 번째 문장입니다。두 번째 문장입니다。";
        let chunks = chunker(12, 0).chunk(text);
        assert_eq!(chunks, vec!["첫 번째 문장입니다。", "두 번째 문장입니다。"]);
        assert!(chunks.iter().all(|c| text.contains(c.as_str())));
    }

    #[test]
    fn test_multibyte_counts_chars() {
        let text = "가나다라마바사아자차";
        let chunks = chunker(5, 0).chunk(text);
        assert_eq!(chunks, vec!["가나다라마", "바사아자차"]);
    }

    #[test]
    fn test_invalid_config() {
        assert!(ChunkConfig::new(100, 100).is_err());
        assert!(ChunkConfig::new(0, 0).is_err());
        assert!(ChunkConfig::new(1000, 200).is_ok());
    }

    #[test]
    fn test_split_documents_carries_metadata() {
        let docs = vec![Document::new("abcdefgh").with_metadata("source", "a.txt")];
        let chunks = chunker(4, 0).split_documents(&docs);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].source().as_deref(), Some("a.txt"));
        assert_eq!(
            chunks[1].metadata()["chunk_index"],
            crate::knowledge::MetadataValue::Integer(1)
        );
    }
}
