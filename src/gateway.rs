//! 苦情レコードの送信先

use crate::config::GatewayConfig;
use crate::error::SubmissionError;
use crate::types::ComplaintRecord;
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TOKEN_LENGTH: usize = 6;

/// 確認用トークン（英大文字と数字の6文字）を生成
pub fn generate_verification_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// ドキュメントストアへの送信
///
/// `submitting` に入るたびに1回だけ呼ばれる。成功すると作成されたIDを返す。
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    async fn create(&self, record: &ComplaintRecord) -> Result<String, SubmissionError>;
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

/// HTTP JSON のドキュメントストア
///
/// `POST {base_url}/{collection}` にレコードを送り、`{"id": ...}` を受け取る。
pub struct HttpDocumentStore {
    url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpDocumentStore {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("送信先 HTTPクライアント作成失敗: {}", e))?;

        Ok(Self {
            url: collection_url(&config.base_url, &config.collection),
            auth_token: config.auth_token.clone(),
            client,
        })
    }
}

fn collection_url(base_url: &str, collection: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        collection.trim_start_matches('/')
    )
}

#[async_trait]
impl SubmissionGateway for HttpDocumentStore {
    async fn create(&self, record: &ComplaintRecord) -> Result<String, SubmissionError> {
        let mut request = self.client.post(&self.url).json(record);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SubmissionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SubmissionError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let body: CreateResponse = response
            .json()
            .await
            .map_err(|e| SubmissionError::InvalidResponse(e.to_string()))?;

        log::info!("苦情を登録しました: id={}", body.id);
        Ok(body.id)
    }
}

/// メモリ上のドキュメントストア（`--dry-run` とテスト用）
#[derive(Default)]
pub struct MemoryDocumentStore {
    records: Mutex<Vec<(String, ComplaintRecord)>>,
    failures_left: Mutex<u32>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 次のn回の送信を失敗させる
    pub fn fail_times(&self, n: u32) {
        *self
            .failures_left
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = n;
    }

    /// 作成済みのレコード
    pub fn records(&self) -> Vec<(String, ComplaintRecord)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SubmissionGateway for MemoryDocumentStore {
    async fn create(&self, record: &ComplaintRecord) -> Result<String, SubmissionError> {
        {
            let mut failures_left = self
                .failures_left
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(SubmissionError::Network("接続できません".to_string()));
            }
        }

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let id = format!("mem-{}", records.len() + 1);
        log::info!(
            "苦情を登録しました (メモリ): id={}\n{}",
            id,
            serde_json::to_string_pretty(record).unwrap_or_default()
        );
        records.push((id.clone(), record.clone()));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Language, LocationFix, Priority};

    fn record() -> ComplaintRecord {
        ComplaintRecord {
            user_id: "citizen-1".to_string(),
            title: "Pothole".to_string(),
            description: "Deep pothole".to_string(),
            category: Category::Road,
            priority: Priority::High,
            status: "pending".to_string(),
            source: "voice".to_string(),
            location: LocationFix::from_coordinates(17.385, 78.4867, None),
            images: vec![],
            verification_token: generate_verification_token(),
            language: Language::En,
            created_at: "2026-10-18T09:00:00+00:00".to_string(),
            updated_at: "2026-10-18T09:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_verification_token_shape() {
        for _ in 0..100 {
            let token = generate_verification_token();
            assert_eq!(token.len(), 6);
            assert!(token
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_collection_url() {
        assert_eq!(
            collection_url("http://localhost:8080/", "/complaints"),
            "http://localhost:8080/complaints"
        );
    }

    #[tokio::test]
    async fn test_memory_store_assigns_ids() {
        let store = MemoryDocumentStore::new();
        assert_eq!(store.create(&record()).await.unwrap(), "mem-1");
        assert_eq!(store.create(&record()).await.unwrap(), "mem-2");
        assert_eq!(store.records().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_fail_times() {
        let store = MemoryDocumentStore::new();
        store.fail_times(1);

        assert!(matches!(
            store.create(&record()).await,
            Err(SubmissionError::Network(_))
        ));
        assert!(store.records().is_empty());
        assert!(store.create(&record()).await.is_ok());
        assert_eq!(store.records().len(), 1);
    }
}
