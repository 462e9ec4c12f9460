//! 回答パーサ
//!
//! 自由発話の回答を、言語ごとの固定語彙に対する部分一致（大文字小文字を区別しない）で
//! 型付きのフィールド値に変換する純粋関数群。
//!
//! 複数のキーワード集合に一致する場合は固定の優先順で最初の一致を返す。
//!
//! - カテゴリ: road, garbage, drainage, water, streetlight, others（一致なしは `None`）
//! - 優先度: critical, high, low（一致なしは medium）

use crate::types::{Category, Language, Priority};

/// カテゴリのキーワード（優先順）
fn category_keywords(language: Language, category: Category) -> &'static [&'static str] {
    match (language, category) {
        (Language::En, Category::Road) => &[
            "road", "pothole", "pot hole", "potholes", "footpath", "pavement", "speed breaker",
            "asphalt", "highway",
        ],
        (Language::En, Category::Garbage) => &[
            "garbage", "trash", "waste", "rubbish", "litter", "dump", "dustbin",
        ],
        (Language::En, Category::Drainage) => &[
            "drain", "drainage", "sewage", "sewer", "gutter", "manhole", "overflow", "clog",
        ],
        (Language::En, Category::Water) => &[
            "water", "tap", "pipeline", "pipe", "leak", "supply",
        ],
        (Language::En, Category::Streetlight) => &[
            "streetlight", "street light", "lamp", "light", "bulb", "dark",
        ],
        (Language::En, Category::Others) => &["other", "others", "something else", "misc"],
        (Language::Te, Category::Road) => &["రోడ్డు", "రోడ్", "రహదారి", "గుంత", "గుంతలు"],
        (Language::Te, Category::Garbage) => &["చెత్త", "వ్యర్థ", "గార్బేజ్"],
        (Language::Te, Category::Drainage) => &["డ్రైనేజీ", "డ్రైనేజ్", "మురుగు", "కాలువ"],
        (Language::Te, Category::Water) => &["నీరు", "నీటి", "నీళ్ళు", "నీళ్లు", "కుళాయి", "పైపు"],
        (Language::Te, Category::Streetlight) => &["వీధి దీపం", "వీధి దీపాలు", "దీపం", "లైట్"],
        (Language::Te, Category::Others) => &["ఇతర", "వేరే"],
    }
}

/// 優先度のキーワード（critical, high, low, medium の順に評価）
fn priority_keywords(language: Language, priority: Priority) -> &'static [&'static str] {
    match (language, priority) {
        (Language::En, Priority::Critical) => &[
            "critical", "emergency", "urgent", "immediately", "life threatening",
        ],
        (Language::En, Priority::High) => &["high", "serious", "severe", "important", "major"],
        (Language::En, Priority::Low) => &["low", "minor", "small", "can wait"],
        (Language::En, Priority::Medium) => &["medium", "moderate", "normal"],
        (Language::Te, Priority::Critical) => &["అత్యవసర", "క్రిటికల్", "ప్రమాదకర"],
        (Language::Te, Priority::High) => &["ఎక్కువ", "తీవ్ర", "ముఖ్యమైన", "హై"],
        (Language::Te, Priority::Low) => &["తక్కువ", "చిన్న"],
        (Language::Te, Priority::Medium) => &["మధ్యస్థ", "మీడియం"],
    }
}

const PRIORITY_ORDER: [Priority; 4] = [
    Priority::Critical,
    Priority::High,
    Priority::Low,
    Priority::Medium,
];

fn matches_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(&k.to_lowercase()))
}

/// カテゴリ回答をパース
///
/// どのキーワード集合にも一致しない場合は `None` を返し、
/// 呼び出し側は同じ質問を聞き直す。
///
/// # Examples
///
/// ```
/// # use civic_voice_intake::parser::parse_category;
/// # use civic_voice_intake::types::{Category, Language};
/// assert_eq!(parse_category("There's a big POTHOLE", Language::En), Some(Category::Road));
/// assert_eq!(parse_category("banana", Language::En), None);
/// ```
pub fn parse_category(transcript: &str, language: Language) -> Option<Category> {
    let normalized = transcript.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    Category::ALL
        .into_iter()
        .find(|category| matches_any(&normalized, category_keywords(language, *category)))
}

/// 優先度回答をパース
///
/// 必ずいずれかの値を返す。一致しない場合は `Priority::Medium`。
pub fn parse_priority(transcript: &str, language: Language) -> Priority {
    let normalized = transcript.trim().to_lowercase();

    PRIORITY_ORDER
        .into_iter()
        .find(|priority| matches_any(&normalized, priority_keywords(language, *priority)))
        .unwrap_or_default()
}

/// 件名・詳細の回答をパース（前後の空白を除いたそのまま）
///
/// 空白のみの回答は `None`。
pub fn parse_free_text(transcript: &str) -> Option<String> {
    let trimmed = transcript.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_english() {
        assert_eq!(parse_category("road", Language::En), Some(Category::Road));
        assert_eq!(
            parse_category("there's a big pothole", Language::En),
            Some(Category::Road)
        );
        assert_eq!(
            parse_category("Garbage is piling up", Language::En),
            Some(Category::Garbage)
        );
        assert_eq!(
            parse_category("the SEWAGE is overflowing", Language::En),
            Some(Category::Drainage)
        );
        assert_eq!(
            parse_category("no water since morning", Language::En),
            Some(Category::Water)
        );
        assert_eq!(
            parse_category("street light is broken", Language::En),
            Some(Category::Streetlight)
        );
        assert_eq!(
            parse_category("something else", Language::En),
            Some(Category::Others)
        );
    }

    #[test]
    fn test_category_unrecognized() {
        assert_eq!(parse_category("banana", Language::En), None);
        assert_eq!(parse_category("", Language::En), None);
        assert_eq!(parse_category("   ", Language::Te), None);
    }

    #[test]
    fn test_category_tie_break_order() {
        // road と water の両方に一致 → road が先
        assert_eq!(
            parse_category("water logging on the road", Language::En),
            Some(Category::Road)
        );
        // drainage と water の両方に一致 → drainage が先
        assert_eq!(
            parse_category("sewage water everywhere", Language::En),
            Some(Category::Drainage)
        );
    }

    #[test]
    fn test_category_telugu() {
        assert_eq!(
            parse_category("మా వీధిలో పెద్ద గుంత ఉంది", Language::Te),
            Some(Category::Road)
        );
        assert_eq!(parse_category("చెత్త", Language::Te), Some(Category::Garbage));
        assert_eq!(
            parse_category("డ్రైనేజీ పారుతోంది", Language::Te),
            Some(Category::Drainage)
        );
        // 英語の語彙はテルグ語セッションでは使わない
        assert_eq!(parse_category("pothole", Language::Te), None);
    }

    #[test]
    fn test_priority_always_valid() {
        assert_eq!(parse_priority("high", Language::En), Priority::High);
        assert_eq!(parse_priority("It is CRITICAL", Language::En), Priority::Critical);
        assert_eq!(parse_priority("pretty minor", Language::En), Priority::Low);
        assert_eq!(parse_priority("", Language::En), Priority::Medium);
        assert_eq!(parse_priority("purple monkey", Language::En), Priority::Medium);
        assert_eq!(parse_priority("medium", Language::En), Priority::Medium);
    }

    #[test]
    fn test_priority_tie_break_order() {
        // critical と high の両方に一致 → critical
        assert_eq!(
            parse_priority("high, actually an emergency", Language::En),
            Priority::Critical
        );
    }

    #[test]
    fn test_priority_telugu() {
        assert_eq!(parse_priority("చాలా ఎక్కువ", Language::Te), Priority::High);
        assert_eq!(parse_priority("తక్కువ", Language::Te), Priority::Low);
        assert_eq!(parse_priority("అత్యవసరం", Language::Te), Priority::Critical);
        assert_eq!(parse_priority("ఏమో", Language::Te), Priority::Medium);
    }

    #[test]
    fn test_free_text() {
        assert_eq!(
            parse_free_text("  Pothole near school "),
            Some("Pothole near school".to_string())
        );
        assert_eq!(parse_free_text(" \t "), None);
    }
}
