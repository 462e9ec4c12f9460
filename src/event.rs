//! 対話エンジンへのイベント
//!
//! アダプタ・タイマー・画面・非同期タスクはセッションを直接変更せず、
//! すべてこのキューにイベントを投入する。エンジンはキューを1つずつ処理する。

use crate::error::{CaptureError, LocationError, PlaybackError, SubmissionError};
use crate::types::{LocationFix, TurnId};
use tokio::sync::mpsc;

/// 対話エンジンが処理するイベント
#[derive(Debug, Clone, PartialEq)]
pub enum DialogueEvent {
    /// セッション開始（位置情報の取得から）
    Start,
    LocationAcquired(LocationFix),
    LocationFailed(LocationError),
    /// プロンプトの読み上げ完了
    PlaybackFinished { turn: TurnId },
    /// プロンプトの読み上げ失敗（完了として扱う）
    PlaybackFailed { turn: TurnId, error: PlaybackError },
    /// 部分結果（表示のみ）
    InterimTranscript { turn: TurnId, text: String },
    /// 確定結果
    FinalTranscript { turn: TurnId, text: String },
    /// 確定結果なしで聞き取りが終了した
    CaptureEnded { turn: TurnId },
    /// 聞き取りのエラー（発話なしを含む）
    CaptureFailed { turn: TurnId, error: CaptureError },
    /// マイクボタンのタップ（状態に応じて停止または再開）
    Tap,
    /// 聞き取り中の手動停止
    ManualStop,
    /// アイドル時の聞き取り再開
    Retrigger,
    /// 手動停止後の猶予時間が経過した
    GraceWindowElapsed { turn: TurnId },
    SubmissionSucceeded { id: String },
    SubmissionFailed(SubmissionError),
    /// 完了表示の時間が経過した
    DisplayElapsed,
    /// 利用者による中断
    Cancel,
}

impl DialogueEvent {
    /// イベントが属するターン（ターンに紐づかないものは `None`）
    pub fn turn(&self) -> Option<TurnId> {
        match self {
            DialogueEvent::PlaybackFinished { turn }
            | DialogueEvent::PlaybackFailed { turn, .. }
            | DialogueEvent::InterimTranscript { turn, .. }
            | DialogueEvent::FinalTranscript { turn, .. }
            | DialogueEvent::CaptureEnded { turn }
            | DialogueEvent::CaptureFailed { turn, .. }
            | DialogueEvent::GraceWindowElapsed { turn } => Some(*turn),
            _ => None,
        }
    }
}

/// イベントキューへの送信ハンドル
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<DialogueEvent>,
}

/// イベントキューを作成
pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<DialogueEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

impl EventSink {
    /// イベントを投入
    ///
    /// エンジンが終了していてキューが閉じている場合は破棄する。
    pub fn post(&self, event: DialogueEvent) {
        if let Err(e) = self.tx.send(event) {
            log::debug!("イベントキューがクローズ済みのため破棄: {:?}", e.0);
        }
    }

    /// 特定ターン用のハンドルを作成
    pub fn for_turn(&self, turn: TurnId) -> TurnSink {
        TurnSink {
            turn,
            sink: self.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 1ターン分のイベント送信ハンドル
///
/// アダプタはこれを受け取り、自分のターン以外のイベントを送れない。
#[derive(Clone, Debug)]
pub struct TurnSink {
    turn: TurnId,
    sink: EventSink,
}

impl TurnSink {
    pub fn turn(&self) -> TurnId {
        self.turn
    }

    pub fn interim(&self, text: impl Into<String>) {
        self.sink.post(DialogueEvent::InterimTranscript {
            turn: self.turn,
            text: text.into(),
        });
    }

    pub fn final_transcript(&self, text: impl Into<String>) {
        self.sink.post(DialogueEvent::FinalTranscript {
            turn: self.turn,
            text: text.into(),
        });
    }

    pub fn capture_ended(&self) {
        self.sink.post(DialogueEvent::CaptureEnded { turn: self.turn });
    }

    pub fn capture_failed(&self, error: CaptureError) {
        self.sink.post(DialogueEvent::CaptureFailed {
            turn: self.turn,
            error,
        });
    }

    pub fn playback_finished(&self) {
        self.sink.post(DialogueEvent::PlaybackFinished { turn: self.turn });
    }

    pub fn playback_failed(&self, error: PlaybackError) {
        self.sink.post(DialogueEvent::PlaybackFailed {
            turn: self.turn,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_sink_tags_events() {
        let (sink, mut rx) = channel();
        let turn_sink = sink.for_turn(TurnId(7));

        turn_sink.interim("pot");
        turn_sink.final_transcript("pothole");
        turn_sink.capture_failed(CaptureError::NoSpeech);

        assert_eq!(
            rx.try_recv().unwrap(),
            DialogueEvent::InterimTranscript {
                turn: TurnId(7),
                text: "pot".to_string()
            }
        );
        assert_eq!(rx.try_recv().unwrap().turn(), Some(TurnId(7)));
        assert_eq!(rx.try_recv().unwrap().turn(), Some(TurnId(7)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_post_after_close_is_ignored() {
        let (sink, rx) = channel();
        drop(rx);
        assert!(sink.is_closed());
        sink.post(DialogueEvent::Cancel);
    }

    #[test]
    fn test_untagged_events() {
        assert_eq!(DialogueEvent::Cancel.turn(), None);
        assert_eq!(DialogueEvent::Tap.turn(), None);
    }
}
