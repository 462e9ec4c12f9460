use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use serde::Serialize;
use std::time::Duration;

/// OpenAI Speech API リクエスト
#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// OpenAI Speech API による音声合成
///
/// `response_format: "pcm"` で 24kHz / 16bit / モノラルのリトルエンディアンPCMを受け取る。
#[derive(Clone)]
pub struct SpeechSynthesizer {
    endpoint: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl SpeechSynthesizer {
    pub fn new(config: &PlaybackConfig, api_key: String) -> Result<Self, PlaybackError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| PlaybackError::Engine(format!("HTTPクライアント作成失敗: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            client,
        })
    }

    /// テキストを合成してPCMサンプルを返す
    pub async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<i16>, PlaybackError> {
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice,
            response_format: "pcm",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PlaybackError::Engine(format!("Speech API リクエスト失敗: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PlaybackError::Engine(format!(
                "Speech API エラー: {} - {}",
                status, error_text
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlaybackError::Engine(format!("Speech API レスポンス受信失敗: {}", e)))?;

        log::debug!("Speech API: {} バイト受信 (voice={})", bytes.len(), voice);
        Ok(pcm_from_le_bytes(&bytes))
    }
}

/// s16le のバイト列をサンプルに変換（端数の1バイトは捨てる）
fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_from_le_bytes() {
        let bytes = [0x01, 0x00, 0xff, 0x7f, 0x00, 0x80, 0x42];
        assert_eq!(pcm_from_le_bytes(&bytes), vec![1, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_request_body() {
        let request = SpeechRequest {
            model: "tts-1",
            input: "Hello",
            voice: "alloy",
            response_format: "pcm",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["voice"], "alloy");
        assert_eq!(json["response_format"], "pcm");
    }
}
