use crate::types::TranscriptResult;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// 文字起こしバックエンドの共通トレイト
///
/// 1回の `start_stream` が1発話に対応する（continuous: off）。
/// 音声の送信チャンネルを閉じると、バックエンドは確定結果を1つ返して
/// 受信チャンネルを閉じる。
#[async_trait]
pub trait TranscribeBackend: Send + Sync {
    /// ストリーミング文字起こしセッションを開始
    ///
    /// # Returns
    /// (送信チャンネル, 受信チャンネル) のタプル
    /// - 送信チャンネル: PCM音声データ（i16サンプル）を送信
    /// - 受信チャンネル: 部分結果（0件以上）と確定結果（最大1件）を受信
    async fn start_stream(
        &self,
    ) -> Result<(mpsc::Sender<Vec<i16>>, mpsc::Receiver<TranscriptResult>)>;

    /// 認識言語（ISO 639-1）
    fn language(&self) -> &str;
}
