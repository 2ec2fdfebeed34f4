//! 평가 데이터셋

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};

/// 정답이 붙은 질문
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledQuestion {
    pub question: String,
    pub ground_truth: String,
}

impl LabeledQuestion {
    pub fn new(question: impl Into<String>, ground_truth: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ground_truth: ground_truth.into(),
        }
    }
}

/// 질문 목록 JSON 로드 (`[{"question", "ground_truth"}]`)
pub fn load_labeled_questions(path: &Path) -> RagResult<Vec<LabeledQuestion>> {
    let parse = || -> anyhow::Result<Vec<LabeledQuestion>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset: {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid dataset JSON: {:?}", path))
    };

    let questions = parse().map_err(|e| RagError::evaluation("cannot load dataset", e))?;
    tracing::info!("Loaded {} labeled questions from {:?}", questions.len(), path);
    Ok(questions)
}

/// 평가 레코드 (파이프라인 실행 결과 + 정답)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRecord {
    pub question: String,
    pub ground_truth: String,
    pub generated_answer: String,
    pub retrieved_contexts: Vec<String>,
}

/// 평가 레코드 묶음
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationDataset {
    records: Vec<EvaluationRecord>,
}

impl EvaluationDataset {
    pub fn push(&mut self, record: EvaluationRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[EvaluationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<EvaluationRecord> for EvaluationDataset {
    fn from_iter<I: IntoIterator<Item = EvaluationRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
