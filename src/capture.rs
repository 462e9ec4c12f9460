//! 音声キャプチャアダプタ
//!
//! 音声認識エンジンを包み、1ターン分の部分結果と確定結果をイベントとして返す。
//! 対話エンジンは実装がマイクか非対応かを意識しない。

use crate::audio_input::AudioInput;
use crate::config::{CaptureConfig, Config, TranscribeConfig, VadConfig};
use crate::error::CaptureError;
use crate::event::TurnSink;
use crate::transcribe_backend::TranscribeBackend;
use crate::types::{AudioChunk, Language};
use crate::vad::{EndpointDetector, UtterancePhase};
use crate::whisper_api::WhisperBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// 音声キャプチャの能力インターフェース
///
/// `start` から確定結果（または終了・エラー）までが1回の聞き取り。
/// 呼び出すのは対話エンジンだけ。
pub trait SpeechCapture {
    /// 実装名（ログ用）
    fn name(&self) -> &'static str;

    /// 音声認識が利用できるかどうか
    fn is_supported(&self) -> bool;

    /// ロケールを設定する
    ///
    /// 認識器を作り直す。進行中の聞き取りは先に完全に破棄される。
    fn configure(&mut self, locale: &str) -> Result<(), CaptureError>;

    /// 聞き取りを開始
    fn start(&mut self, sink: TurnSink) -> Result<(), CaptureError>;

    /// 聞き取りの終了を要求（この後も確定結果が届くことがある）
    fn stop(&mut self);

    /// 聞き取りを破棄（結果は届かない）
    fn abort(&mut self);
}

/// 音声認識が使えない環境用の実装
#[derive(Debug, Default)]
pub struct UnsupportedCapture;

impl SpeechCapture for UnsupportedCapture {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn is_supported(&self) -> bool {
        false
    }

    fn configure(&mut self, _locale: &str) -> Result<(), CaptureError> {
        Ok(())
    }

    fn start(&mut self, _sink: TurnSink) -> Result<(), CaptureError> {
        Err(CaptureError::NotSupported)
    }

    fn stop(&mut self) {}

    fn abort(&mut self) {}
}

/// 1回の聞き取りのパラメータ
#[derive(Clone, Debug)]
struct UtteranceSettings {
    vad: VadConfig,
    sample_rate: u32,
    no_speech_timeout: Duration,
    max_utterance: Duration,
}

/// 進行中の聞き取り
struct ActiveListen {
    input: AudioInput,
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

/// マイク + VAD + 文字起こしバックエンドによる実装
pub struct MicrophoneCapture {
    capture_config: CaptureConfig,
    transcribe_config: TranscribeConfig,
    api_key: String,
    settings: UtteranceSettings,
    backend: Option<Arc<dyn TranscribeBackend>>,
    active: Option<ActiveListen>,
}

impl MicrophoneCapture {
    pub fn new(config: &Config, api_key: String) -> Self {
        Self {
            capture_config: config.capture.clone(),
            transcribe_config: config.transcribe.clone(),
            api_key,
            settings: UtteranceSettings {
                vad: config.vad.clone(),
                sample_rate: config.capture.sample_rate,
                no_speech_timeout: Duration::from_millis(config.capture.no_speech_timeout_ms),
                max_utterance: Duration::from_secs(config.capture.max_utterance_secs),
            },
            backend: None,
            active: None,
        }
    }
}

impl SpeechCapture for MicrophoneCapture {
    fn name(&self) -> &'static str {
        "microphone"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn configure(&mut self, locale: &str) -> Result<(), CaptureError> {
        // 2つの聞き取りが同時に走らないよう、先に破棄する
        self.abort();
        self.backend = None;

        let language = Language::from_code(locale).map(|l| l.code()).unwrap_or("en");
        let backend = WhisperBackend::new(
            self.transcribe_config.clone(),
            self.api_key.clone(),
            language,
            self.capture_config.sample_rate,
        )
        .map_err(|e| CaptureError::Engine(format!("{:#}", e)))?;

        log::info!("音声認識を設定: locale={}, language={}", locale, language);
        self.backend = Some(Arc::new(backend));
        Ok(())
    }

    fn start(&mut self, sink: TurnSink) -> Result<(), CaptureError> {
        self.abort();

        let backend = self
            .backend
            .clone()
            .ok_or_else(|| CaptureError::Engine("音声認識が未設定です".to_string()))?;

        let mut input = AudioInput::new(&self.capture_config)
            .map_err(|e| CaptureError::Engine(format!("{:#}", e)))?;

        let (chunk_tx, chunk_rx) = mpsc::channel::<AudioChunk>(256);
        input
            .start(chunk_tx)
            .map_err(|e| CaptureError::PermissionDenied(format!("{:#}", e)))?;

        let stop = Arc::new(Notify::new());
        let task = tokio::spawn(run_utterance(
            backend,
            chunk_rx,
            self.settings.clone(),
            stop.clone(),
            sink,
        ));

        self.active = Some(ActiveListen { input, stop, task });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(active) = &self.active {
            active.stop.notify_one();
        }
    }

    fn abort(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.task.abort();
            active.input.stop();
        }
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.abort();
    }
}

/// 1発話分の処理
///
/// マイクのチャンクをVADで区切ってバックエンドに送り、結果をターンのイベントに変換する。
async fn run_utterance(
    backend: Arc<dyn TranscribeBackend>,
    mut chunks: mpsc::Receiver<AudioChunk>,
    settings: UtteranceSettings,
    stop: Arc<Notify>,
    sink: TurnSink,
) {
    let (audio_tx, mut result_rx) = match backend.start_stream().await {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("ターン {}: 文字起こしストリーム開始失敗: {:#}", sink.turn(), e);
            sink.capture_failed(CaptureError::Engine(format!("{:#}", e)));
            return;
        }
    };

    let mut audio_tx = Some(audio_tx);
    let mut detector = EndpointDetector::new(&settings.vad, settings.sample_rate);

    let no_speech_deadline = tokio::time::sleep(settings.no_speech_timeout);
    tokio::pin!(no_speech_deadline);
    let max_deadline = tokio::time::sleep(settings.max_utterance);
    tokio::pin!(max_deadline);

    loop {
        tokio::select! {
            chunk = chunks.recv(), if audio_tx.is_some() => {
                let Some(chunk) = chunk else {
                    audio_tx = None;
                    continue;
                };
                let phase = detector.push(&chunk.samples);
                if detector.speech_started() {
                    if let Some(tx) = &audio_tx {
                        if tx.send(chunk.samples).await.is_err() {
                            log::warn!("ターン {}: 文字起こしへの送信に失敗", sink.turn());
                        }
                    }
                }
                if phase == UtterancePhase::Ended {
                    log::debug!("ターン {}: 発話終了を検出", sink.turn());
                    audio_tx = None;
                }
            }
            _ = stop.notified(), if audio_tx.is_some() => {
                log::debug!("ターン {}: 聞き取り停止要求", sink.turn());
                audio_tx = None;
            }
            _ = &mut no_speech_deadline, if audio_tx.is_some() && !detector.speech_started() => {
                log::info!("ターン {}: 発話が検出されませんでした", sink.turn());
                sink.capture_failed(CaptureError::NoSpeech);
                return;
            }
            _ = &mut max_deadline, if audio_tx.is_some() => {
                log::info!("ターン {}: 最大発話時間に達しました", sink.turn());
                audio_tx = None;
            }
            result = result_rx.recv() => match result {
                Some(result) if result.is_partial => sink.interim(result.text),
                Some(result) => {
                    sink.final_transcript(result.text);
                    return;
                }
                None => {
                    sink.capture_ended();
                    return;
                }
            }
        }
    }
}

/// 起動時に利用可能な実装を選ぶ
pub fn detect(config: &Config) -> Box<dyn SpeechCapture> {
    if !config.capture.enabled {
        log::info!("音声認識は設定で無効化されています");
        return Box::new(UnsupportedCapture);
    }

    let Some(api_key) = config.transcribe.resolve_api_key() else {
        log::warn!("音声認識のAPIキーがありません (OPENAI_API_KEY)");
        return Box::new(UnsupportedCapture);
    };

    if !AudioInput::is_available() {
        log::warn!("入力デバイスが見つかりません");
        return Box::new(UnsupportedCapture);
    }

    Box::new(MicrophoneCapture::new(config, api_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{self, DialogueEvent};
    use crate::types::{TranscriptResult, TurnId};
    use async_trait::async_trait;
    use std::time::SystemTime;

    /// 決まった結果を返すバックエンド
    struct ScriptedBackend {
        interim: Vec<&'static str>,
        final_text: Option<&'static str>,
    }

    #[async_trait]
    impl TranscribeBackend for ScriptedBackend {
        async fn start_stream(
            &self,
        ) -> anyhow::Result<(mpsc::Sender<Vec<i16>>, mpsc::Receiver<TranscriptResult>)> {
            let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<i16>>(64);
            let (result_tx, result_rx) = mpsc::channel(8);
            let interim = self.interim.clone();
            let final_text = self.final_text;
            tokio::spawn(async move {
                let mut sent_interim = false;
                while audio_rx.recv().await.is_some() {
                    if !sent_interim {
                        for text in &interim {
                            let _ = result_tx
                                .send(TranscriptResult::new(text.to_string(), true, SystemTime::now()))
                                .await;
                        }
                        sent_interim = true;
                    }
                }
                if let Some(text) = final_text {
                    let _ = result_tx
                        .send(TranscriptResult::new(text.to_string(), false, SystemTime::now()))
                        .await;
                }
            });
            Ok((audio_tx, result_rx))
        }

        fn language(&self) -> &str {
            "en"
        }
    }

    fn settings() -> UtteranceSettings {
        UtteranceSettings {
            vad: VadConfig {
                threshold_db: -40.0,
                hangover_duration_ms: 200,
            },
            sample_rate: 16000,
            no_speech_timeout: Duration::from_millis(100),
            max_utterance: Duration::from_secs(5),
        }
    }

    fn chunk(amplitude: f32) -> AudioChunk {
        AudioChunk {
            samples: (0..1600)
                .map(|i| ((i as f32 * 0.1).sin() * amplitude) as i16)
                .collect(),
            sample_rate: 16000,
            timestamp_ns: 0,
        }
    }

    #[tokio::test]
    async fn test_utterance_emits_interim_then_final() {
        let (sink, mut rx) = event::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(16);
        let backend = Arc::new(ScriptedBackend {
            interim: vec!["pot"],
            final_text: Some("pothole"),
        });

        let task = tokio::spawn(run_utterance(
            backend,
            chunk_rx,
            settings(),
            Arc::new(Notify::new()),
            sink.for_turn(TurnId(3)),
        ));

        chunk_tx.send(chunk(10000.0)).await.unwrap();
        chunk_tx.send(chunk(0.0)).await.unwrap();
        chunk_tx.send(chunk(0.0)).await.unwrap();
        task.await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            DialogueEvent::InterimTranscript {
                turn: TurnId(3),
                text: "pot".to_string()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            DialogueEvent::FinalTranscript {
                turn: TurnId(3),
                text: "pothole".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_utterance_reports_no_speech() {
        let (sink, mut rx) = event::channel();
        let (_chunk_tx, chunk_rx) = mpsc::channel::<AudioChunk>(16);
        let backend = Arc::new(ScriptedBackend {
            interim: vec![],
            final_text: None,
        });

        run_utterance(
            backend,
            chunk_rx,
            settings(),
            Arc::new(Notify::new()),
            sink.for_turn(TurnId(1)),
        )
        .await;

        assert_eq!(
            rx.recv().await.unwrap(),
            DialogueEvent::CaptureFailed {
                turn: TurnId(1),
                error: CaptureError::NoSpeech
            }
        );
    }

    #[tokio::test]
    async fn test_stop_request_closes_utterance() {
        let (sink, mut rx) = event::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(16);
        let backend = Arc::new(ScriptedBackend {
            interim: vec![],
            final_text: Some("garbage"),
        });
        let stop = Arc::new(Notify::new());
        let mut long_settings = settings();
        long_settings.no_speech_timeout = Duration::from_secs(5);

        let task = tokio::spawn(run_utterance(
            backend,
            chunk_rx,
            long_settings,
            stop.clone(),
            sink.for_turn(TurnId(2)),
        ));

        // 話し始めた後、無音のハングオーバー前に停止要求
        chunk_tx.send(chunk(10000.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.notify_one();
        task.await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            DialogueEvent::FinalTranscript {
                turn: TurnId(2),
                text: "garbage".to_string()
            }
        );
    }

    #[test]
    fn test_unsupported_capture_refuses_to_start() {
        let (sink, _rx) = event::channel();
        let mut capture = UnsupportedCapture;
        assert!(!capture.is_supported());
        assert_eq!(
            capture.start(sink.for_turn(TurnId(1))),
            Err(CaptureError::NotSupported)
        );
    }

    #[test]
    fn test_detect_respects_disabled_capture() {
        let mut config = Config::default();
        config.capture.enabled = false;
        assert!(!detect(&config).is_supported());
    }
}
