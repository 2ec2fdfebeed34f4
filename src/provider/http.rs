//! 프로바이더 공용 HTTP 전송 계층
//!
//! 재시도(지수 백오프)와 선택적 Rate Limiter를 제공합니다.
//! 모든 어댑터가 같은 방식으로 요청/에러 응답을 처리합니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;

/// 기본 요청 타임아웃
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// 429/5xx 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

// ============================================================================
// Retry Policy
// ============================================================================

/// 재시도 정책
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// 재시도 없음 (테스트, 폴백 체인용)
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.pow(attempt)
    }
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Rate Limiter with minimum delay between requests
#[derive(Debug)]
pub struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay,
            last_request: None,
        }
    }

    /// 요청 가능 여부 확인 및 대기
    async fn acquire(&mut self) {
        // 1. 최소 딜레이 적용 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();

        // 2. 윈도우 밖의 오래된 요청 제거
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. Rate limit 초과 시 대기
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

// ============================================================================
// Transport
// ============================================================================

/// 공통 API 에러 응답 (`{"error": {"message": ...}}` 형태)
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default, alias = "type")]
    status: String,
}

/// 재시도/Rate Limit이 적용된 HTTP 전송
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryPolicy,
    limiter: Option<Arc<Mutex<RateLimiter>>>,
}

impl HttpTransport {
    /// 타임아웃을 지정하여 생성
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            retry,
            limiter: None,
        })
    }

    /// Rate Limiter 부착
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(Arc::new(Mutex::new(limiter)));
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// 요청 전송 후 JSON 응답 파싱
    ///
    /// `build`는 시도마다 새 요청을 구성합니다. 전송 실패, 429, 5xx는 재시도하고
    /// 그 외 에러 상태는 즉시 실패합니다.
    pub async fn send_json<R, F>(&self, provider: &str, build: F) -> Result<R>
    where
        R: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=self.retry.max_retries {
            if let Some(limiter) = &self.limiter {
                limiter.lock().await.acquire().await;
            }

            let response = match build(&self.client).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send {} request: {}", provider, e));
                    if attempt < self.retry.max_retries {
                        let backoff = self.retry.backoff(attempt);
                        tracing::warn!(
                            "{} request failed, retrying in {:?} (attempt {}/{})",
                            provider,
                            backoff,
                            attempt + 1,
                            self.retry.max_retries
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                return serde_json::from_str(&body)
                    .with_context(|| format!("Failed to parse {} response", provider));
            }

            if status.as_u16() == 429 || status.is_server_error() {
                last_error = Some(anyhow::anyhow!("{} API error ({}): {}", provider, status, body));
                if attempt < self.retry.max_retries {
                    let backoff = self.retry.backoff(attempt);
                    tracing::warn!(
                        "{} returned {}, backing off {:?} (attempt {}/{})",
                        provider,
                        status,
                        backoff,
                        attempt + 1,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                break;
            }

            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                anyhow::bail!(
                    "{} API error ({} {}): {}",
                    provider,
                    status.as_u16(),
                    error.error.status,
                    error.error.message
                );
            }
            anyhow::bail!("{} API error ({}): {}", provider, status, body);
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("{} request failed after {} retries", provider, self.retry.max_retries)
        }))
    }
}

/// 베이스 URL 뒤에 경로 결합 (슬래시 중복 제거)
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

// ============================================================================
// Tests
// ============================================================================
