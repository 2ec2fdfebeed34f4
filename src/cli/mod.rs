//! CLI 모듈
//!
//! grounded-rag CLI 명령어 정의 및 구현

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Settings;
use crate::evaluation::{load_labeled_questions, Evaluator, LlmJudgeMetrics};
use crate::generation::AnswerGenerator;
use crate::knowledge::{load_seed_documents, EmbeddingStore};
use crate::pipeline::RagPipeline;
use crate::provider::{
    create_chat_model_with_fallback, create_embedding_model, create_generation_model,
    EmbeddingProvider, GenerationProvider,
};
use crate::retrieval::Retriever;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "grounded-rag")]
#[command(version, about = "컨텍스트 기반 RAG 파이프라인", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 지식베이스 폴더의 텍스트 파일을 분할/임베딩하여 저장
    Ingest {
        /// 수집할 폴더 경로 (기본: KNOWLEDGE_BASE_DIRECTORY)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// 시드 문서 JSON을 그대로 추가
    Seed {
        /// {"documents": [{"content", "metadata"}]} 형식 파일
        #[arg(short, long)]
        file: PathBuf,
    },

    /// 질문에 대한 근거 기반 답변
    Query {
        /// 질문
        question: String,

        /// 사용된 컨텍스트 출력
        #[arg(long)]
        show_context: bool,
    },

    /// 임계값 없이 유사 문서 검색
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 (기본: SEARCH_K)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// 대화형 질의응답 ('quit' 입력 시 종료)
    Chat,

    /// 정답 데이터셋으로 파이프라인 평가
    Evaluate {
        /// [{"question", "ground_truth"}] 형식 파일
        #[arg(short, long)]
        dataset: PathBuf,

        /// 질문별 점수 출력
        #[arg(long)]
        per_record: bool,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load().context("설정 로드 실패")?;

    match cli.command {
        Commands::Ingest { dir } => cmd_ingest(&settings, dir).await,
        Commands::Seed { file } => cmd_seed(&settings, file).await,
        Commands::Query {
            question,
            show_context,
        } => cmd_query(&settings, &question, show_context).await,
        Commands::Search { query, limit } => cmd_search(&settings, &query, limit).await,
        Commands::Chat => cmd_chat(&settings).await,
        Commands::Evaluate {
            dataset,
            per_record,
        } => cmd_evaluate(&settings, dataset, per_record).await,
        Commands::Status => cmd_status(&settings).await,
    }
}

// ============================================================================
// Component Wiring
// ============================================================================

fn embedding_model(settings: &Settings) -> Result<Arc<dyn EmbeddingProvider>> {
    let config = settings.embedding_model_config()?;
    create_embedding_model(&config, &settings.model_options()).context("임베딩 모델 생성 실패")
}

/// 설정된 생성 모델, 실패 시 폴백 체인
fn generation_model(settings: &Settings) -> Result<Arc<dyn GenerationProvider>> {
    let options = settings.model_options();

    match create_generation_model(&settings.generation_model_config(), &options) {
        Ok(model) => Ok(model),
        Err(e) => {
            println!("[!] {} 생성 모델 사용 불가: {}", settings.generation_provider, e);
            println!("[*] 다른 프로바이더로 전환 중...");

            let outcome = create_chat_model_with_fallback(&settings.credentials, &options)
                .context("사용 가능한 생성 모델이 없습니다")?;
            println!(
                "[OK] {} 모델 사용 ({})",
                outcome.provider,
                outcome.model.model_name()
            );
            Ok(outcome.model)
        }
    }
}

async fn open_store(settings: &Settings, embedder: Arc<dyn EmbeddingProvider>) -> Result<Arc<EmbeddingStore>> {
    let store = EmbeddingStore::open(
        embedder,
        settings.vector_backend,
        &settings.vector_store_directory,
    )
    .await
    .context("벡터 저장소 열기 실패")?
    .with_chunk_config(settings.chunk_config()?)
    .with_timeout(settings.store_timeout());

    Ok(Arc::new(store))
}

fn retriever(settings: &Settings, store: Arc<EmbeddingStore>) -> Arc<Retriever> {
    Arc::new(Retriever::new(store, settings.retrieval_options()))
}

fn pipeline(
    settings: &Settings,
    store: Arc<EmbeddingStore>,
    model: Arc<dyn GenerationProvider>,
) -> Result<Arc<RagPipeline>> {
    let generator = AnswerGenerator::new(model)
        .with_prompt(settings.prompt_template()?)
        .with_timeout(settings.request_timeout() * 4);

    Ok(Arc::new(RagPipeline::new(
        retriever(settings, store),
        Arc::new(generator),
    )))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(settings: &Settings, dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| settings.knowledge_base_directory.clone());
    if !dir.exists() {
        anyhow::bail!("지식베이스 폴더 '{}'가 존재하지 않습니다.", dir.display());
    }

    let store = open_store(settings, embedding_model(settings)?).await?;

    println!("[*] 문서 로드 중: {}", dir.display());
    let documents = store.load_source_documents(&dir).await?;
    if documents.is_empty() {
        println!("[!] 읽을 수 있는 문서가 없습니다.");
        return Ok(());
    }
    println!("[OK] {}개 문서 로드됨", documents.len());

    println!("[*] 임베딩 생성 중...");
    let chunks = store.ingest(&documents).await.context("임베딩 저장 실패")?;
    println!("[OK] {}개 청크 저장 완료", chunks);

    Ok(())
}

/// 시드 문서 추가 명령어 (seed)
async fn cmd_seed(settings: &Settings, file: PathBuf) -> Result<()> {
    let documents = load_seed_documents(&file)?;
    if documents.is_empty() {
        println!("[!] 시드 파일에 문서가 없습니다.");
        return Ok(());
    }

    let store = open_store(settings, embedding_model(settings)?).await?;
    let added = retriever(settings, store)
        .add_documents(documents)
        .await
        .context("문서 추가 실패")?;

    println!("[OK] {}개 문서를 추가했습니다.", added);
    Ok(())
}

/// 질의 명령어 (query)
async fn cmd_query(settings: &Settings, question: &str, show_context: bool) -> Result<()> {
    let store = open_store(settings, embedding_model(settings)?).await?;
    let pipeline = pipeline(settings, store, generation_model(settings)?)?;

    let outcome = pipeline.query(question).await?;

    println!("\n[OK] 답변:\n{}", outcome.answer);
    if show_context {
        println!("\n[*] 컨텍스트:\n{}", outcome.context);
    }

    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(settings: &Settings, query: &str, limit: Option<usize>) -> Result<()> {
    let store = open_store(settings, embedding_model(settings)?).await?;
    let k = limit.unwrap_or(settings.search_k);

    let results = store.search_similar(query, k).await.context("검색 실패")?;
    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());
    for (i, doc) in results.iter().enumerate() {
        println!("{}. {}", i + 1, doc.source().unwrap_or_else(|| "-".to_string()));
        println!("   내용: {}", truncate_text(doc.content(), 200));
        println!();
    }

    Ok(())
}

/// 대화형 명령어 (chat)
async fn cmd_chat(settings: &Settings) -> Result<()> {
    let store = open_store(settings, embedding_model(settings)?).await?;
    let pipeline = pipeline(settings, store, generation_model(settings)?)?;

    println!("\n질문을 입력하세요 (종료하려면 'quit' 입력):");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n질문: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.eq_ignore_ascii_case("quit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        match pipeline.query(question).await {
            Ok(outcome) => println!("\n답변: {}", outcome.answer),
            Err(e) => println!("\n[!] 질의 실패: {:#}", anyhow::Error::from(e)),
        }
    }

    Ok(())
}

/// 평가 명령어 (evaluate)
async fn cmd_evaluate(settings: &Settings, dataset: PathBuf, per_record: bool) -> Result<()> {
    let questions = load_labeled_questions(&dataset)?;

    let embedder = embedding_model(settings)?;
    let store = open_store(settings, embedder.clone()).await?;
    let model = generation_model(settings)?;
    let pipeline = pipeline(settings, store, model.clone())?;

    // 판정 모델은 생성 모델을 그대로 사용
    let metrics = Arc::new(LlmJudgeMetrics::new(model, embedder));
    let evaluator = Evaluator::new(pipeline, metrics).with_concurrency(settings.eval_concurrency);

    println!("[*] RAG 시스템 평가 시작 ({}개 질문)...", questions.len());
    let report = evaluator.evaluate_dataset(&questions).await?;

    println!("\n[OK] 데이터셋 전체 평가:");
    println!("{}", serde_json::to_string_pretty(&report.to_map())?);

    if per_record {
        println!("\n[*] 질문별 평가:");
        for scored in &report.records {
            println!("\n질문: {}", scored.record.question);
            println!("{}", serde_json::to_string_pretty(&scored.scores.to_map())?);
        }
    }

    println!("\n평가 시각: {}", report.evaluated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(settings: &Settings) -> Result<()> {
    println!("grounded-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 벡터 저장소: {} ({})", settings.vector_store_directory.display(), settings.vector_backend);
    println!("[*] 지식베이스: {}", settings.knowledge_base_directory.display());
    println!(
        "[*] 검색: top_k={}, threshold={}, {}",
        settings.top_k, settings.similarity_threshold, settings.score_order
    );

    // 모델 상태
    match embedding_model(settings) {
        Ok(embedder) => {
            println!("[OK] 임베딩 모델: {} ({})", embedder.name(), settings.embedding_provider);

            match open_store(settings, embedder).await {
                Ok(store) => match store.stats().await {
                    Ok(stats) => println!(
                        "[OK] 벡터 인덱스: {} 청크 ({})",
                        stats.document_count, stats.backend
                    ),
                    Err(e) => println!("[!] 통계 조회 실패: {}", e),
                },
                Err(e) => println!("[!] 벡터 저장소 열기 실패: {:#}", e),
            }
        }
        Err(e) => println!("[!] 임베딩 모델: {:#}", e),
    }

    match create_generation_model(&settings.generation_model_config(), &settings.model_options()) {
        Ok(model) => println!("[OK] 생성 모델: {} ({})", model.model_name(), settings.generation_provider),
        Err(e) => println!("[!] 생성 모델: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("안녕하세요 세계", 5), "안녕하세요...");
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::parse_from(["grounded-rag", "evaluate", "--dataset", "q.json", "--per-record"]);
        assert!(matches!(
            cli.command,
            Commands::Evaluate { per_record: true, .. }
        ));

        let cli = Cli::parse_from(["grounded-rag", "query", "RAG란?", "--show-context"]);
        match cli.command {
            Commands::Query { question, show_context } => {
                assert_eq!(question, "RAG란?");
                assert!(show_context);
            }
            _ => panic!("expected query"),
        }
    }
}
