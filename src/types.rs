use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// 16ビット整数型のオーディオサンプル
///
/// PCM形式の音声データを表現するための型エイリアス。
/// -32768 から 32767 の範囲の値を取る。
pub type SampleI16 = i16;

/// オーディオチャンク
///
/// タイムスタンプ付きの音声データのまとまり。
/// マイク入力から受信したモノラルの生データを表現する。
#[derive(Clone, Debug)]
pub struct AudioChunk {
    /// PCM音声サンプルの配列
    pub samples: Vec<SampleI16>,

    /// サンプリングレート (Hz)
    pub sample_rate: u32,

    /// このチャンクの開始タイムスタンプ (ナノ秒)
    ///
    /// UNIX_EPOCHからの経過時間
    pub timestamp_ns: u128,
}

/// VAD（Voice Activity Detection）の状態
///
/// 音声検出器の現在の状態を表す。
/// ハングオーバー機構により、音声が途切れてもすぐには
/// 無音状態に遷移しない。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VadState {
    /// 無音状態
    Silence,

    /// 音声状態
    Voice {
        /// ハングオーバー残り時間（ミリ秒）
        hangover_remaining_ms: u32,
    },
}

/// セッションの言語
///
/// セッション開始前に選択され、セッション中は変更されない。
/// 音声エンジンのロケールとプロンプト・キーワード語彙を決定する。
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// 英語
    En,
    /// テルグ語
    Te,
}

impl Language {
    /// 音声エンジンに渡すロケール
    pub fn locale(&self) -> &'static str {
        match self {
            Language::En => "en-IN",
            Language::Te => "te-IN",
        }
    }

    /// ISO 639-1 言語コード
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Te => "te",
        }
    }

    /// 言語コードからパース（"en", "te", "en-IN" など）
    pub fn from_code(code: &str) -> Option<Self> {
        let lower = code.trim().to_lowercase();
        match lower.split(['-', '_']).next() {
            Some("en") => Some(Language::En),
            Some("te") => Some(Language::Te),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 苦情カテゴリ（6種類の固定値）
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Road,
    Garbage,
    Drainage,
    Water,
    Streetlight,
    Others,
}

impl Category {
    /// キーワード照合の優先順
    pub const ALL: [Category; 6] = [
        Category::Road,
        Category::Garbage,
        Category::Drainage,
        Category::Water,
        Category::Streetlight,
        Category::Others,
    ];

    /// 表示用ラベル
    pub fn label(&self, language: Language) -> &'static str {
        match (self, language) {
            (Category::Road, Language::En) => "Road Issues",
            (Category::Garbage, Language::En) => "Garbage Collection",
            (Category::Drainage, Language::En) => "Drainage Problems",
            (Category::Water, Language::En) => "Water Supply",
            (Category::Streetlight, Language::En) => "Street Lights",
            (Category::Others, Language::En) => "Other Issues",
            (Category::Road, Language::Te) => "రోడ్డు సమస్యలు",
            (Category::Garbage, Language::Te) => "చెత్త సేకరణ",
            (Category::Drainage, Language::Te) => "డ్రైనేజీ సమస్యలు",
            (Category::Water, Language::Te) => "నీటి సరఫరా",
            (Category::Streetlight, Language::Te) => "వీధి దీపాలు",
            (Category::Others, Language::Te) => "ఇతర సమస్యలు",
        }
    }
}

/// 優先度（4段階）
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// 表示用ラベル
    pub fn label(&self, language: Language) -> &'static str {
        match (self, language) {
            (Priority::Low, Language::En) => "Low",
            (Priority::Medium, Language::En) => "Medium",
            (Priority::High, Language::En) => "High",
            (Priority::Critical, Language::En) => "Critical",
            (Priority::Low, Language::Te) => "తక్కువ",
            (Priority::Medium, Language::Te) => "మధ్యస్థం",
            (Priority::High, Language::Te) => "ఎక్కువ",
            (Priority::Critical, Language::Te) => "క్రిటికల్",
        }
    }
}

/// 対話のステップ
///
/// 固定順序で前進する。パース失敗時は同じステップを繰り返し、
/// 送信失敗時のみ `Priority` に戻る。
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Locating,
    Category,
    Title,
    Description,
    Priority,
    Submitting,
    Done,
}

impl Step {
    /// 質問ステップかどうか（プロンプトを読み上げて回答を待つ）
    pub fn is_question(&self) -> bool {
        matches!(
            self,
            Step::Category | Step::Title | Step::Description | Step::Priority
        )
    }

    /// 次のステップ
    pub fn next(&self) -> Step {
        match self {
            Step::Locating => Step::Category,
            Step::Category => Step::Title,
            Step::Title => Step::Description,
            Step::Description => Step::Priority,
            Step::Priority => Step::Submitting,
            Step::Submitting | Step::Done => Step::Done,
        }
    }
}

/// ターン状態
///
/// 常にどれか1つだけがアクティブ。
/// アダプタを呼び出してよいかどうかはこの状態で決まる。
#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnState {
    #[default]
    Idle,
    Speaking,
    Listening,
    Processing,
}

/// ターン識別子
///
/// アダプタやタイマーからのイベントにはこの値が付与される。
/// 現在のターンと一致しないイベントは破棄される。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnId(pub u64);

impl TurnId {
    pub fn next(&self) -> TurnId {
        TurnId(self.0 + 1)
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 位置情報
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// 人が読める住所文字列
    pub address: String,
}

impl LocationFix {
    /// 座標から作成（住所が無い場合は座標を文字列化する）
    pub fn from_coordinates(latitude: f64, longitude: f64, address: Option<String>) -> Self {
        let address = address
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| format!("Lat: {:.4}, Long: {:.4}", latitude, longitude));
        Self {
            latitude,
            longitude,
            address,
        }
    }
}

/// 収集済みフィールド
///
/// 前進するステップごとに1つずつ埋まり、巻き戻されることはない。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectedFields {
    pub category: Option<Category>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Priority,
}

/// 送信される苦情レコード
///
/// ドキュメントストアに作成されるJSONの形。
///
/// # JSON出力例
///
/// ```json
/// {
///   "userId": "citizen-1",
///   "title": "Pothole near school",
///   "description": "It's dangerous for kids",
///   "category": "road",
///   "priority": "high",
///   "status": "pending",
///   "source": "voice",
///   "location": { "latitude": 17.385, "longitude": 78.4867, "address": "Lat: 17.3850, Long: 78.4867" },
///   "images": [],
///   "verificationToken": "K7Q2ZD",
///   "language": "en",
///   "createdAt": "2026-10-18T09:12:44+00:00",
///   "updatedAt": "2026-10-18T09:12:44+00:00"
/// }
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintRecord {
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub priority: Priority,
    pub status: String,
    pub source: String,
    pub location: LocationFix,
    pub images: Vec<String>,
    pub verification_token: String,
    pub language: Language,
    pub created_at: String,
    pub updated_at: String,
}

/// 文字起こし結果
///
/// 音声認識エンジンからの結果。
/// 部分結果（interim）は表示のみに使い、確定結果（final）で対話が進む。
#[derive(Clone, Debug, Serialize)]
pub struct TranscriptResult {
    /// ISO 8601形式のタイムスタンプ
    pub timestamp: String,

    /// 開始時刻からの経過秒数
    pub timestamp_seconds: f64,

    /// 文字起こしテキスト
    pub text: String,

    /// 部分結果かどうか
    ///
    /// true: 部分結果, false: 確定結果
    pub is_partial: bool,
}

impl TranscriptResult {
    /// 新しい文字起こし結果を作成
    ///
    /// # Examples
    ///
    /// ```
    /// # use civic_voice_intake::types::TranscriptResult;
    /// # use std::time::SystemTime;
    /// let result = TranscriptResult::new("pothole".to_string(), false, SystemTime::now());
    /// assert_eq!(result.text, "pothole");
    /// assert!(!result.is_partial);
    /// ```
    pub fn new(text: String, is_partial: bool, start_time: SystemTime) -> Self {
        let now = SystemTime::now();

        let duration = now.duration_since(start_time).unwrap_or_default();
        let timestamp_seconds = duration.as_secs_f64();

        let timestamp = chrono::DateTime::from_timestamp(
            now.duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64,
            0,
        )
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();

        Self {
            timestamp,
            timestamp_seconds,
            text,
            is_partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_code() {
        assert_eq!(Language::from_code("en"), Some(Language::En));
        assert_eq!(Language::from_code("EN-us"), Some(Language::En));
        assert_eq!(Language::from_code("te_IN"), Some(Language::Te));
        assert_eq!(Language::from_code("fr"), None);
        assert_eq!(Language::Te.locale(), "te-IN");
    }

    #[test]
    fn test_step_order() {
        let mut step = Step::Locating;
        let mut visited = vec![step];
        while step != Step::Done {
            step = step.next();
            visited.push(step);
        }
        assert_eq!(
            visited,
            vec![
                Step::Locating,
                Step::Category,
                Step::Title,
                Step::Description,
                Step::Priority,
                Step::Submitting,
                Step::Done,
            ]
        );
        assert!(Step::Title.is_question());
        assert!(!Step::Submitting.is_question());
    }

    #[test]
    fn test_location_fix_default_address() {
        let fix = LocationFix::from_coordinates(17.385, 78.48671, None);
        assert_eq!(fix.address, "Lat: 17.3850, Long: 78.4867");

        let fix = LocationFix::from_coordinates(1.0, 2.0, Some("Hyderabad".to_string()));
        assert_eq!(fix.address, "Hyderabad");
    }

    #[test]
    fn test_complaint_record_json_shape() {
        let record = ComplaintRecord {
            user_id: "u1".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            category: Category::Streetlight,
            priority: Priority::Critical,
            status: "pending".to_string(),
            source: "voice".to_string(),
            location: LocationFix::from_coordinates(1.0, 2.0, None),
            images: Vec::new(),
            verification_token: "ABC123".to_string(),
            language: Language::Te,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
            updated_at: "2026-01-01T00:00:00+00:00".to_string(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["category"], "streetlight");
        assert_eq!(json["priority"], "critical");
        assert_eq!(json["verificationToken"], "ABC123");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["language"], "te");
        assert_eq!(json["location"]["latitude"], 1.0);
    }

    #[test]
    fn test_transcript_result_creation() {
        let start_time = SystemTime::now();
        let result = TranscriptResult::new("テストメッセージ".to_string(), true, start_time);

        assert_eq!(result.text, "テストメッセージ");
        assert!(result.is_partial);
        assert!(result.timestamp_seconds >= 0.0);
        assert!(!result.timestamp.is_empty());
    }
}
