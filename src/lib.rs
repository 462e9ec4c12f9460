//! civic-voice-intake - 音声による市民苦情受付
//!
//! このクレートは、利用者が選んだ言語（英語またはテルグ語）で質問を読み上げ、
//! 音声の回答から苦情レコードを作成してドキュメントストアに登録する対話エンジンを提供します。
//!
//! # 主な機能
//!
//! - **対話ステートマシン**: 位置情報 → カテゴリ → タイトル → 詳細 → 優先度 → 送信
//! - **ターン制御**: 読み上げ → 聞き取り → 処理。手動停止の猶予時間と、ターン完了の冪等性
//! - **回答の解析**: 英語・テルグ語のキーワードによるカテゴリと優先度の判定
//! - **音声入力**: マイク + VADによる発話区間検出 + OpenAI Whisper API
//! - **音声出力**: OpenAI Speech API + スピーカー（使えない環境では無音で継続）
//! - **TUI**: 進捗・ターン状態・部分結果・お知らせの表示
//!
//! # アーキテクチャ
//!
//! ```text
//! [TUI / Ctrl+C] ──┐
//! [Timers]     ────┤
//! [Capture]    ────┼──→ [EventSink] → [DialogueEngine::advance] → [SessionView] → [TUI]
//! [Playback]   ────┤                         │
//! [Location]   ────┤                         ├─→ SpeechPlayback::speak
//! [Gateway]    ────┘                         ├─→ SpeechCapture::start / stop / abort
//!                                            └─→ SubmissionGateway::create
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use civic_voice_intake::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod audio_input;
pub mod audio_output;
pub mod capture;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod event;
pub mod gateway;
pub mod location;
pub mod parser;
pub mod playback;
pub mod prompts;
pub mod session_view;
pub mod transcribe_backend;
pub mod tts_api;
pub mod tui;
pub mod types;
pub mod vad;
pub mod whisper_api;
