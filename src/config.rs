use crate::types::Language;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub transcribe: TranscribeConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// 無音（発話なし）で聞き取りが終わった場合の方針
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoSpeechPolicy {
    /// アイドルに戻り、手動での再開を待つ
    Manual,
    /// 自動的に聞き取りを再開する（回数上限あり）
    AutoRetry,
}

/// 対話エンジン設定
///
/// # デフォルト値
///
/// - `language`: "en"
/// - `grace_window_ms`: 1500 ms (手動停止後に確定結果を待つ時間)
/// - `max_category_reasks`: 3 回
/// - `no_speech_policy`: manual
/// - `max_auto_retries`: 2 回
/// - `done_display_ms`: 2000 ms
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DialogueConfig {
    #[serde(default = "default_language")]
    pub language: Language,
    #[serde(default = "default_grace_window_ms")]
    pub grace_window_ms: u64,
    #[serde(default = "default_max_category_reasks")]
    pub max_category_reasks: u32,
    #[serde(default = "default_no_speech_policy")]
    pub no_speech_policy: NoSpeechPolicy,
    #[serde(default = "default_max_auto_retries")]
    pub max_auto_retries: u32,
    #[serde(default = "default_done_display_ms")]
    pub done_display_ms: u64,
}

/// マイク入力設定
///
/// # デフォルト値
///
/// - `enabled`: true
/// - `device_id`: "default" (システムのデフォルトデバイス)
/// - `sample_rate`: 16000 Hz
/// - `no_speech_timeout_ms`: 6000 ms
/// - `max_utterance_secs`: 20 秒
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_no_speech_timeout_ms")]
    pub no_speech_timeout_ms: u64,
    #[serde(default = "default_max_utterance_secs")]
    pub max_utterance_secs: u64,
}

/// VAD (Voice Activity Detection) 設定
///
/// 発話の始まりと終わりの検出に使う。
///
/// # デフォルト値
///
/// - `threshold_db`: -40.0 dB
/// - `hangover_duration_ms`: 900 ms (この時間無音が続いたら発話終了)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VadConfig {
    #[serde(default = "default_threshold_db")]
    pub threshold_db: f32,
    #[serde(default = "default_hangover_duration_ms")]
    pub hangover_duration_ms: u32,
}

/// 音声認識 (OpenAI Whisper API) 設定
///
/// `api_key` が未設定の場合は環境変数 `OPENAI_API_KEY` を使う。
///
/// # デフォルト値
///
/// - `endpoint`: "https://api.openai.com/v1/audio/transcriptions"
/// - `model`: "whisper-1"
/// - `interim_interval_ms`: 1500 ms (部分結果の間隔)
/// - `timeout_seconds`: 30 秒
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscribeConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_transcribe_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_whisper_model")]
    pub model: String,
    #[serde(default = "default_interim_interval_ms")]
    pub interim_interval_ms: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// 音声カタログの1エントリ
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct VoiceProfile {
    /// 音声名
    pub name: String,
    /// 対応ロケール（"en-IN" など）
    pub locale: String,
}

/// 音声合成 (OpenAI Speech API) 設定
///
/// # デフォルト値
///
/// - `enabled`: true
/// - `endpoint`: "https://api.openai.com/v1/audio/speech"
/// - `model`: "tts-1"
/// - `sample_rate`: 24000 Hz (APIのPCM出力)
/// - `default_voice`: "alloy"
/// - `voices`: en-IN のみ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub api_key: Option<String>,
    #[serde(default = "default_speech_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_tts_model")]
    pub model: String,
    pub device_id: Option<String>,
    #[serde(default = "default_playback_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_voice")]
    pub default_voice: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_voices")]
    pub voices: Vec<VoiceProfile>,
}

/// 位置情報プロバイダの種類
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LocationProviderType {
    /// 設定ファイルの座標
    Fixed,
    /// IPアドレスからの推定
    Ip,
}

/// 位置情報設定
///
/// # デフォルト値
///
/// - `provider`: "ip"
/// - `url`: "http://ip-api.com/json"
/// - `timeout_secs`: 10 秒
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocationConfig {
    #[serde(default = "default_location_provider")]
    pub provider: LocationProviderType,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    pub address: Option<String>,
    #[serde(default = "default_location_url")]
    pub url: String,
    #[serde(default = "default_location_timeout_secs")]
    pub timeout_secs: u64,
}

/// 送信先ドキュメントストア設定
///
/// # デフォルト値
///
/// - `base_url`: "http://localhost:8080"
/// - `collection`: "complaints"
/// - `user_id`: "anonymous"
/// - `timeout_secs`: 15 秒
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    pub auth_token: Option<String>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

/// 出力設定
///
/// # デフォルト値
///
/// - `log_level`: "info"
/// - `log_file`: "civic-voice-intake.log" (画面表示中のログ出力先)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

// Default functions
fn default_language() -> Language {
    Language::En
}

fn default_grace_window_ms() -> u64 {
    1500
}

fn default_max_category_reasks() -> u32 {
    3
}

fn default_no_speech_policy() -> NoSpeechPolicy {
    NoSpeechPolicy::Manual
}

fn default_max_auto_retries() -> u32 {
    2
}

fn default_done_display_ms() -> u64 {
    2000
}

fn default_enabled() -> bool {
    true
}

fn default_device_id() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    16000 // Whisperの推奨値
}

fn default_no_speech_timeout_ms() -> u64 {
    6000
}

fn default_max_utterance_secs() -> u64 {
    20
}

fn default_threshold_db() -> f32 {
    -40.0
}

fn default_hangover_duration_ms() -> u32 {
    900
}

fn default_transcribe_endpoint() -> String {
    "https://api.openai.com/v1/audio/transcriptions".to_string()
}

fn default_whisper_model() -> String {
    "whisper-1".to_string()
}

fn default_interim_interval_ms() -> u64 {
    1500
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_speech_endpoint() -> String {
    "https://api.openai.com/v1/audio/speech".to_string()
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

fn default_playback_sample_rate() -> u32 {
    24000
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_voices() -> Vec<VoiceProfile> {
    vec![VoiceProfile {
        name: "alloy".to_string(),
        locale: "en-IN".to_string(),
    }]
}

fn default_location_provider() -> LocationProviderType {
    LocationProviderType::Ip
}

fn default_location_url() -> String {
    "http://ip-api.com/json".to_string()
}

fn default_location_timeout_secs() -> u64 {
    10
}

fn default_gateway_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_collection() -> String {
    "complaints".to_string()
}

fn default_user_id() -> String {
    "anonymous".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "civic-voice-intake.log".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialogue: DialogueConfig::default(),
            capture: CaptureConfig::default(),
            vad: VadConfig::default(),
            transcribe: TranscribeConfig::default(),
            playback: PlaybackConfig::default(),
            location: LocationConfig::default(),
            gateway: GatewayConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            grace_window_ms: default_grace_window_ms(),
            max_category_reasks: default_max_category_reasks(),
            no_speech_policy: default_no_speech_policy(),
            max_auto_retries: default_max_auto_retries(),
            done_display_ms: default_done_display_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            device_id: default_device_id(),
            sample_rate: default_sample_rate(),
            no_speech_timeout_ms: default_no_speech_timeout_ms(),
            max_utterance_secs: default_max_utterance_secs(),
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold_db: default_threshold_db(),
            hangover_duration_ms: default_hangover_duration_ms(),
        }
    }
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_transcribe_endpoint(),
            model: default_whisper_model(),
            interim_interval_ms: default_interim_interval_ms(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            api_key: None,
            endpoint: default_speech_endpoint(),
            model: default_tts_model(),
            device_id: None,
            sample_rate: default_playback_sample_rate(),
            default_voice: default_voice(),
            timeout_seconds: default_timeout_seconds(),
            voices: default_voices(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            provider: default_location_provider(),
            latitude: 0.0,
            longitude: 0.0,
            address: None,
            url: default_location_url(),
            timeout_secs: default_location_timeout_secs(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            collection: default_collection(),
            auth_token: None,
            user_id: default_user_id(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: default_log_file(),
        }
    }
}

impl TranscribeConfig {
    /// APIキーを解決（設定ファイル → 環境変数 OPENAI_API_KEY）
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_api_key(self.api_key.as_deref())
    }
}

impl PlaybackConfig {
    /// APIキーを解決（設定ファイル → 環境変数 OPENAI_API_KEY）
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_api_key(self.api_key.as_deref())
    }
}

fn resolve_api_key(configured: Option<&str>) -> Option<String> {
    configured
        .map(str::to_string)
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.trim().is_empty())
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use civic_voice_intake::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dialogue.language, Language::En);
        assert_eq!(config.dialogue.grace_window_ms, 1500);
        assert_eq!(config.dialogue.max_category_reasks, 3);
        assert_eq!(config.dialogue.no_speech_policy, NoSpeechPolicy::Manual);
        assert_eq!(config.capture.sample_rate, 16000);
        assert_eq!(config.vad.threshold_db, -40.0);
        assert_eq!(config.transcribe.model, "whisper-1");
        assert_eq!(config.playback.default_voice, "alloy");
        assert_eq!(config.location.provider, LocationProviderType::Ip);
        assert_eq!(config.gateway.collection, "complaints");
    }

    #[test]
    fn test_write_and_read_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        Config::write_default(path).unwrap();

        let config = Config::from_file(path).unwrap();
        assert_eq!(config.capture.sample_rate, 16000);
        assert_eq!(config.playback.voices.len(), 1);
        assert_eq!(config.gateway.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_custom_config() {
        let toml_content = r#"
[dialogue]
language = "te"
grace_window_ms = 800
max_category_reasks = 5
no_speech_policy = "auto_retry"
max_auto_retries = 1

[capture]
device_id = "USB Mic"
no_speech_timeout_ms = 4000

[vad]
threshold_db = -35.0
hangover_duration_ms = 1200

[playback]
default_voice = "nova"

[[playback.voices]]
name = "shimmer"
locale = "te-IN"

[location]
provider = "fixed"
latitude = 17.385
longitude = 78.4867
address = "Hyderabad"

[gateway]
base_url = "https://example.invalid/api"
auth_token = "secret"
user_id = "citizen-42"

[output]
log_level = "debug"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.dialogue.language, Language::Te);
        assert_eq!(config.dialogue.grace_window_ms, 800);
        assert_eq!(config.dialogue.max_category_reasks, 5);
        assert_eq!(config.dialogue.no_speech_policy, NoSpeechPolicy::AutoRetry);
        assert_eq!(config.dialogue.max_auto_retries, 1);
        assert_eq!(config.capture.device_id, "USB Mic");
        assert_eq!(config.capture.no_speech_timeout_ms, 4000);
        assert_eq!(config.vad.threshold_db, -35.0);
        assert_eq!(config.vad.hangover_duration_ms, 1200);
        assert_eq!(config.playback.default_voice, "nova");
        assert_eq!(
            config.playback.voices,
            vec![VoiceProfile {
                name: "shimmer".to_string(),
                locale: "te-IN".to_string(),
            }]
        );
        assert_eq!(config.location.provider, LocationProviderType::Fixed);
        assert_eq!(config.location.address.as_deref(), Some("Hyderabad"));
        assert_eq!(config.gateway.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.gateway.user_id, "citizen-42");
        assert_eq!(config.output.log_level, "debug");
    }

    #[test]
    fn test_load_or_default_nonexistent() {
        let config = Config::load_or_default("nonexistent_file.toml").unwrap();
        assert_eq!(config.capture.sample_rate, 16000);
    }

    #[test]
    fn test_partial_config() {
        // 一部の設定のみ記述した場合、残りはデフォルト値が使われる
        let toml_content = r#"
[dialogue]
grace_window_ms = 2500
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.dialogue.grace_window_ms, 2500);
        assert_eq!(config.dialogue.max_category_reasks, 3);
        assert_eq!(config.dialogue.done_display_ms, 2000);
        assert_eq!(config.vad.hangover_duration_ms, 900);
    }

    #[test]
    fn test_configured_api_key_wins() {
        let config = TranscribeConfig {
            api_key: Some("sk-test".to_string()),
            ..TranscribeConfig::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-test"));
    }
}
