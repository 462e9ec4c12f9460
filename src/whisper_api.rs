use crate::config::TranscribeConfig;
use crate::transcribe_backend::TranscribeBackend;
use crate::types::TranscriptResult;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use std::io::Cursor;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

/// OpenAI Whisper API レスポンス
#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
}

/// OpenAI Whisper API バックエンド
///
/// 発話中は `interim_interval_ms` ごとにそれまでの音声全体を文字起こしして部分結果を返し、
/// 送信チャンネルが閉じたら全体を文字起こしして確定結果を返す。
#[derive(Clone)]
pub struct WhisperBackend {
    config: TranscribeConfig,
    api_key: String,
    language: String,
    sample_rate: u32,
    client: reqwest::Client,
}

impl WhisperBackend {
    pub fn new(
        config: TranscribeConfig,
        api_key: String,
        language: &str,
        sample_rate: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Whisper API HTTPクライアント作成失敗")?;

        Ok(Self {
            config,
            api_key,
            language: language.to_string(),
            sample_rate,
            client,
        })
    }

    /// PCMデータをWAVフォーマットに変換
    fn pcm_to_wav(&self, pcm_data: &[i16]) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).context("WAVライター作成失敗")?;

            for &sample in pcm_data {
                writer.write_sample(sample).context("WAV書き込み失敗")?;
            }

            writer.finalize().context("WAV finalize失敗")?;
        }

        Ok(cursor.into_inner())
    }

    /// Whisper APIを呼び出して文字起こし
    async fn transcribe_audio(&self, wav_data: Vec<u8>) -> Result<String> {
        let part = multipart::Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;

        let form = multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("language", self.language.clone());

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Whisper API リクエスト失敗")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Whisper API エラー: {} - {}", status, error_text);
        }

        let whisper_response: WhisperResponse = response
            .json::<WhisperResponse>()
            .await
            .context("Whisper API レスポンスパース失敗")?;

        Ok(whisper_response.text.trim().to_string())
    }

    /// 蓄積したPCMを文字起こし
    async fn transcribe_pcm(&self, pcm: &[i16]) -> Result<String> {
        let wav_data = self.pcm_to_wav(pcm)?;
        log::debug!(
            "Whisper API: {} サンプル ({} バイト) を文字起こし中",
            pcm.len(),
            wav_data.len()
        );
        self.transcribe_audio(wav_data).await
    }
}

#[async_trait]
impl TranscribeBackend for WhisperBackend {
    async fn start_stream(
        &self,
    ) -> Result<(mpsc::Sender<Vec<i16>>, mpsc::Receiver<TranscriptResult>)> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<i16>>(4096);
        let (result_tx, result_rx) = mpsc::channel::<TranscriptResult>(32);

        let backend = self.clone();
        let start_time = SystemTime::now();
        let interim_interval = Duration::from_millis(self.config.interim_interval_ms.max(250));

        tokio::spawn(async move {
            let mut pcm_buffer: Vec<i16> = Vec::new();
            let mut transcribed_len = 0usize;
            let mut ticker = tokio::time::interval(interim_interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    received = audio_rx.recv() => match received {
                        Some(samples) => pcm_buffer.extend_from_slice(&samples),
                        None => break,
                    },
                    _ = ticker.tick() => {
                        // 新しい音声がある場合のみ部分結果を作る
                        if pcm_buffer.len() == transcribed_len {
                            continue;
                        }
                        transcribed_len = pcm_buffer.len();
                        match backend.transcribe_pcm(&pcm_buffer).await {
                            Ok(text) if !text.is_empty() => {
                                let interim = TranscriptResult::new(text, true, start_time);
                                if let Err(e) = result_tx.try_send(interim) {
                                    log::warn!("Whisper API 部分結果送信失敗: {}", e);
                                }
                            }
                            Ok(_) => {}
                            Err(e) => log::warn!("Whisper API 部分結果の文字起こし失敗: {:#}", e),
                        }
                    }
                }
            }

            log::debug!("WhisperBackend: チャンネルクローズ");

            if pcm_buffer.is_empty() {
                return;
            }

            match backend.transcribe_pcm(&pcm_buffer).await {
                Ok(text) if !text.is_empty() => {
                    let transcript = TranscriptResult::new(text, false, start_time);
                    if let Err(e) = result_tx.send(transcript).await {
                        log::warn!("Whisper API 結果送信失敗: {}", e);
                    }
                }
                Ok(_) => log::debug!("Whisper API: 確定結果が空でした"),
                Err(e) => log::error!("Whisper API 文字起こし失敗: {:#}", e),
            }
        });

        Ok((audio_tx, result_rx))
    }

    fn language(&self) -> &str {
        &self.language
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> WhisperBackend {
        WhisperBackend::new(TranscribeConfig::default(), "sk-test".to_string(), "te", 16000)
            .unwrap()
    }

    #[test]
    fn test_pcm_to_wav_header() {
        let wav = backend().pcm_to_wav(&[0i16; 1600]).unwrap();

        // RIFFヘッダ + 1600サンプル × 2バイト
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 3200);

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
    }

    #[test]
    fn test_language() {
        assert_eq!(backend().language(), "te");
    }

    #[tokio::test]
    async fn test_silent_stream_closes_without_result() {
        let backend = backend();
        let (audio_tx, mut result_rx) = backend.start_stream().await.unwrap();

        // 音声を送らずに閉じると、APIを呼ばずに結果なしで終わる
        drop(audio_tx);
        assert!(result_rx.recv().await.is_none());
    }
}
