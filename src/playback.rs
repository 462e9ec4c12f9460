//! 音声再生アダプタ
//!
//! プロンプトを読み上げ、終わったらターンのイベントで知らせる。

use crate::audio_output::AudioOutput;
use crate::config::{Config, VoiceProfile};
use crate::error::PlaybackError;
use crate::event::TurnSink;
use crate::tts_api::SpeechSynthesizer;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 再生デバイスのバッファ分の余裕
const DRAIN_MARGIN: Duration = Duration::from_millis(150);

/// ロケールに対する声の選択結果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoiceSelection {
    /// ロケールに合う声が見つかった
    Matched(String),
    /// 見つからずデフォルトの声を使う
    Fallback(String),
}

impl VoiceSelection {
    pub fn voice(&self) -> &str {
        match self {
            VoiceSelection::Matched(voice) | VoiceSelection::Fallback(voice) => voice,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, VoiceSelection::Fallback(_))
    }
}

/// ロケールに合う声を選ぶ
///
/// 完全一致（大文字小文字無視）を優先し、次に言語部分（`te-IN` の `te`）の一致を探す。
pub fn select_voice(voices: &[VoiceProfile], default_voice: &str, locale: &str) -> VoiceSelection {
    let exact = voices
        .iter()
        .find(|v| v.locale.eq_ignore_ascii_case(locale));
    if let Some(voice) = exact {
        return VoiceSelection::Matched(voice.name.clone());
    }

    let language = locale.split(['-', '_']).next().unwrap_or(locale);
    let by_language = voices.iter().find(|v| {
        v.locale
            .split(['-', '_'])
            .next()
            .is_some_and(|l| l.eq_ignore_ascii_case(language))
    });
    match by_language {
        Some(voice) => VoiceSelection::Matched(voice.name.clone()),
        None => VoiceSelection::Fallback(default_voice.to_string()),
    }
}

/// 音声再生の能力インターフェース
pub trait SpeechPlayback {
    /// 実装名（ログ用）
    fn name(&self) -> &'static str;

    /// 実際に音が出るかどうか
    fn is_supported(&self) -> bool;

    /// ロケールに合わせて声を選ぶ
    fn configure(&mut self, locale: &str) -> VoiceSelection;

    /// 読み上げを開始（終了は `playback_finished` で届く）
    fn speak(&mut self, text: &str, sink: TurnSink) -> Result<(), PlaybackError>;

    /// 読み上げを中断（終了イベントは届かない）
    fn cancel(&mut self);
}

/// 音が出せない環境用の実装
///
/// テキストをログに出してすぐに再生完了とする。
#[derive(Debug, Default)]
pub struct SilentPlayback;

impl SpeechPlayback for SilentPlayback {
    fn name(&self) -> &'static str {
        "silent"
    }

    fn is_supported(&self) -> bool {
        false
    }

    fn configure(&mut self, locale: &str) -> VoiceSelection {
        VoiceSelection::Matched(locale.to_string())
    }

    fn speak(&mut self, text: &str, sink: TurnSink) -> Result<(), PlaybackError> {
        log::info!("読み上げ (無音) {}: {}", sink.turn(), text);
        sink.playback_finished();
        Ok(())
    }

    fn cancel(&mut self) {}
}

/// 音声合成 + スピーカーによる実装
pub struct SpeakerPlayback {
    synthesizer: SpeechSynthesizer,
    output: AudioOutput,
    voices: Vec<VoiceProfile>,
    default_voice: String,
    voice: String,
    task: Option<JoinHandle<()>>,
}

impl SpeakerPlayback {
    pub fn new(config: &Config, api_key: String) -> anyhow::Result<Self> {
        let playback = &config.playback;
        let synthesizer = SpeechSynthesizer::new(playback, api_key)?;
        let output = AudioOutput::new(playback.device_id.as_deref(), playback.sample_rate)?;

        Ok(Self {
            synthesizer,
            output,
            voices: playback.voices.clone(),
            default_voice: playback.default_voice.clone(),
            voice: playback.default_voice.clone(),
            task: None,
        })
    }
}

impl SpeechPlayback for SpeakerPlayback {
    fn name(&self) -> &'static str {
        "speaker"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn configure(&mut self, locale: &str) -> VoiceSelection {
        let selection = select_voice(&self.voices, &self.default_voice, locale);
        log::info!("読み上げの声: {:?} (locale={})", selection, locale);
        self.voice = selection.voice().to_string();
        selection
    }

    fn speak(&mut self, text: &str, sink: TurnSink) -> Result<(), PlaybackError> {
        self.cancel();

        let audio_tx = self
            .output
            .start()
            .map_err(|e| PlaybackError::Engine(format!("{:#}", e)))?;

        let synthesizer = self.synthesizer.clone();
        let text = text.to_string();
        let voice = self.voice.clone();
        let sample_rate = self.output.sample_rate().max(1);

        self.task = Some(tokio::spawn(async move {
            let samples = match synthesizer.synthesize(&text, &voice).await {
                Ok(samples) => samples,
                Err(e) => {
                    log::warn!("読み上げ {}: 音声合成失敗: {}", sink.turn(), e);
                    sink.playback_failed(e);
                    return;
                }
            };

            let duration = Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64);
            for chunk in samples.chunks(sample_rate as usize / 10) {
                if audio_tx.send(chunk.to_vec()).await.is_err() {
                    sink.playback_failed(PlaybackError::Engine(
                        "出力ストリームが閉じています".to_string(),
                    ));
                    return;
                }
            }

            tokio::time::sleep(duration + DRAIN_MARGIN).await;
            sink.playback_finished();
        }));

        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.output.clear();
    }
}

impl Drop for SpeakerPlayback {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// 起動時に利用可能な実装を選ぶ
pub fn detect(config: &Config) -> Box<dyn SpeechPlayback> {
    if !config.playback.enabled {
        log::info!("読み上げは設定で無効化されています");
        return Box::new(SilentPlayback);
    }

    let Some(api_key) = config.playback.resolve_api_key() else {
        log::warn!("読み上げのAPIキーがありません (OPENAI_API_KEY)");
        return Box::new(SilentPlayback);
    };

    match SpeakerPlayback::new(config, api_key) {
        Ok(playback) => Box::new(playback),
        Err(e) => {
            log::warn!("読み上げを初期化できません: {:#}", e);
            Box::new(SilentPlayback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{self, DialogueEvent};
    use crate::types::TurnId;

    fn voices() -> Vec<VoiceProfile> {
        vec![
            VoiceProfile {
                name: "alloy".to_string(),
                locale: "en-IN".to_string(),
            },
            VoiceProfile {
                name: "nova".to_string(),
                locale: "te-IN".to_string(),
            },
            VoiceProfile {
                name: "echo".to_string(),
                locale: "en-US".to_string(),
            },
        ]
    }

    #[test]
    fn test_select_voice_exact_match() {
        assert_eq!(
            select_voice(&voices(), "alloy", "en-us"),
            VoiceSelection::Matched("echo".to_string())
        );
        assert_eq!(
            select_voice(&voices(), "alloy", "te-IN"),
            VoiceSelection::Matched("nova".to_string())
        );
    }

    #[test]
    fn test_select_voice_language_prefix() {
        assert_eq!(
            select_voice(&voices(), "alloy", "te_AP"),
            VoiceSelection::Matched("nova".to_string())
        );
    }

    #[test]
    fn test_select_voice_fallback() {
        let selection = select_voice(&voices(), "alloy", "hi-IN");
        assert!(selection.is_fallback());
        assert_eq!(selection.voice(), "alloy");

        assert!(select_voice(&[], "alloy", "en-IN").is_fallback());
    }

    #[test]
    fn test_silent_playback_finishes_immediately() {
        let (sink, mut rx) = event::channel();
        let mut playback = SilentPlayback;

        playback.speak("Hello", sink.for_turn(TurnId(4))).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            DialogueEvent::PlaybackFinished { turn: TurnId(4) }
        );
    }

    #[test]
    fn test_detect_respects_disabled_playback() {
        let mut config = Config::default();
        config.playback.enabled = false;
        assert!(!detect(&config).is_supported());
    }
}
