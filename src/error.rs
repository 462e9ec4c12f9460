//! アダプタ層のエラー型と、対話フローにおける扱いの分類

use thiserror::Error;

/// 音声認識（キャプチャ）のエラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// 発話が検出されなかった
    #[error("発話が検出されませんでした")]
    NoSpeech,
    /// マイクの使用が許可されていない
    #[error("マイクへのアクセスが拒否されました: {0}")]
    PermissionDenied(String),
    /// 音声認識エンジンが利用できない
    #[error("音声認識はサポートされていません")]
    NotSupported,
    /// エンジン内部のエラー
    #[error("音声認識エラー: {0}")]
    Engine(String),
}

/// 音声合成（再生）のエラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("音声合成はサポートされていません")]
    NotSupported,
    #[error("音声合成エラー: {0}")]
    Engine(String),
}

/// 位置情報取得のエラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("位置情報の利用が拒否されました")]
    PermissionDenied,
    #[error("位置情報の取得がタイムアウトしました")]
    Timeout,
    #[error("位置情報を取得できません: {0}")]
    Unavailable(String),
}

/// 送信（永続化）のエラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("ネットワークエラー: {0}")]
    Network(String),
    #[error("サービスエラー: {status} - {message}")]
    Service { status: u16, message: String },
    #[error("レスポンスが不正です: {0}")]
    InvalidResponse(String),
}

/// 対話フローにおけるエラーの扱い
///
/// アダプタのエラーはターン境界でいずれかに分類され、
/// 生のエラーとして上位に伝播することはない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowError {
    /// セッションを中断して言語選択に戻る
    FatalToFlow,
    /// 同じステップを聞き直す
    ReaskStep,
    /// 既定値で進む
    DefaultValue,
    /// 前のステップからやり直す
    RetryStep,
    /// 通知して継続
    SilentDegrade,
    /// ターンを終えてアイドルに戻る
    TurnAborted,
    /// ユーザーによる中断
    UserAbort,
}

impl From<&CaptureError> for FlowError {
    fn from(err: &CaptureError) -> Self {
        match err {
            CaptureError::NoSpeech => FlowError::TurnAborted,
            CaptureError::PermissionDenied(_) => FlowError::TurnAborted,
            CaptureError::NotSupported => FlowError::TurnAborted,
            CaptureError::Engine(_) => FlowError::TurnAborted,
        }
    }
}

impl From<&PlaybackError> for FlowError {
    fn from(_: &PlaybackError) -> Self {
        FlowError::SilentDegrade
    }
}

impl From<&LocationError> for FlowError {
    fn from(_: &LocationError) -> Self {
        FlowError::FatalToFlow
    }
}

impl From<&SubmissionError> for FlowError {
    fn from(_: &SubmissionError) -> Self {
        FlowError::RetryStep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_classification() {
        assert_eq!(FlowError::from(&LocationError::Timeout), FlowError::FatalToFlow);
        assert_eq!(
            FlowError::from(&SubmissionError::Network("down".to_string())),
            FlowError::RetryStep
        );
        assert_eq!(
            FlowError::from(&PlaybackError::Engine("x".to_string())),
            FlowError::SilentDegrade
        );
        assert_eq!(FlowError::from(&CaptureError::NoSpeech), FlowError::TurnAborted);
    }

    #[test]
    fn test_error_messages() {
        let err = SubmissionError::Service {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(err.to_string().contains("503"));
    }
}
