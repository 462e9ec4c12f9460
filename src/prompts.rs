//! 読み上げるプロンプトと利用者向けメッセージ

use crate::types::{Language, Step};

/// プロンプトの種類
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptKind {
    /// 最初の質問
    Initial,
    /// 聞き取れなかった・理解できなかった場合の聞き直し
    Retry,
}

/// 利用者向けの定型メッセージ
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phrase {
    Locating,
    LocationFailed,
    NoSpeech,
    CaptureFailed,
    CategoryFallback,
    VoiceFallback,
    Submitting,
    Submitted,
    SubmissionFailed,
}

/// ステップの質問文を取得
///
/// 質問ステップ以外では `None`。
pub fn prompt(language: Language, step: Step, kind: PromptKind) -> Option<&'static str> {
    let text = match (language, step, kind) {
        (Language::En, Step::Category, PromptKind::Initial) => {
            "What kind of problem are you reporting? For example road, garbage, drainage, water, or street light."
        }
        (Language::En, Step::Category, PromptKind::Retry) => {
            "Sorry, I did not catch the category. Please say road, garbage, drainage, water, street light, or other."
        }
        (Language::En, Step::Title, PromptKind::Initial) => "Please give a short title for the issue.",
        (Language::En, Step::Title, PromptKind::Retry) => {
            "I did not hear a title. Please say a short title for the issue."
        }
        (Language::En, Step::Description, PromptKind::Initial) => {
            "Please describe the problem in a few sentences."
        }
        (Language::En, Step::Description, PromptKind::Retry) => {
            "I did not hear a description. Please describe the problem."
        }
        (Language::En, Step::Priority, PromptKind::Initial) => {
            "How urgent is it? Say low, medium, high, or critical."
        }
        (Language::En, Step::Priority, PromptKind::Retry) => {
            "Let's try again. How urgent is it? Say low, medium, high, or critical."
        }
        (Language::Te, Step::Category, PromptKind::Initial) => {
            "మీరు ఏ రకమైన సమస్యను నివేదిస్తున్నారు? ఉదాహరణకు రోడ్డు, చెత్త, డ్రైనేజీ, నీరు లేదా వీధి దీపం."
        }
        (Language::Te, Step::Category, PromptKind::Retry) => {
            "క్షమించండి, వర్గం అర్థం కాలేదు. దయచేసి రోడ్డు, చెత్త, డ్రైనేజీ, నీరు, వీధి దీపం లేదా ఇతర అని చెప్పండి."
        }
        (Language::Te, Step::Title, PromptKind::Initial) => {
            "దయచేసి సమస్యకు చిన్న శీర్షిక చెప్పండి."
        }
        (Language::Te, Step::Title, PromptKind::Retry) => {
            "శీర్షిక వినిపించలేదు. దయచేసి మళ్ళీ చెప్పండి."
        }
        (Language::Te, Step::Description, PromptKind::Initial) => {
            "దయచేసి సమస్యను కొన్ని వాక్యాలలో వివరించండి."
        }
        (Language::Te, Step::Description, PromptKind::Retry) => {
            "వివరణ వినిపించలేదు. దయచేసి సమస్యను వివరించండి."
        }
        (Language::Te, Step::Priority, PromptKind::Initial) => {
            "ఇది ఎంత అత్యవసరం? తక్కువ, మధ్యస్థం, ఎక్కువ లేదా క్రిటికల్ అని చెప్పండి."
        }
        (Language::Te, Step::Priority, PromptKind::Retry) => {
            "మళ్ళీ ప్రయత్నిద్దాం. ఇది ఎంత అత్యవసరం? తక్కువ, మధ్యస్థం, ఎక్కువ లేదా క్రిటికల్ అని చెప్పండి."
        }
        _ => return None,
    };
    Some(text)
}

/// 定型メッセージを取得
pub fn phrase(language: Language, phrase: Phrase) -> &'static str {
    match (language, phrase) {
        (Language::En, Phrase::Locating) => "Getting your location...",
        (Language::En, Phrase::LocationFailed) => {
            "Could not get your location. Voice reporting needs a location."
        }
        (Language::En, Phrase::NoSpeech) => "No speech detected. Tap the microphone to try again.",
        (Language::En, Phrase::CaptureFailed) => {
            "Could not start listening. Check microphone access and tap to retry."
        }
        (Language::En, Phrase::CategoryFallback) => {
            "Category not recognized, filing under other issues."
        }
        (Language::En, Phrase::VoiceFallback) => {
            "No voice for the selected language, using the default voice."
        }
        (Language::En, Phrase::Submitting) => "Submitting your complaint...",
        (Language::En, Phrase::Submitted) => "Complaint submitted successfully.",
        (Language::En, Phrase::SubmissionFailed) => {
            "Submission failed. Please answer the priority again to retry."
        }
        (Language::Te, Phrase::Locating) => "మీ స్థానాన్ని పొందుతున్నాం...",
        (Language::Te, Phrase::LocationFailed) => {
            "మీ స్థానం లభించలేదు. వాయిస్ నివేదికకు స్థానం అవసరం."
        }
        (Language::Te, Phrase::NoSpeech) => {
            "మాట వినిపించలేదు. మళ్ళీ ప్రయత్నించడానికి మైక్‌ను నొక్కండి."
        }
        (Language::Te, Phrase::CaptureFailed) => {
            "వినడం ప్రారంభించలేకపోయాం. మైక్ అనుమతిని తనిఖీ చేసి మళ్ళీ నొక్కండి."
        }
        (Language::Te, Phrase::CategoryFallback) => {
            "వర్గం గుర్తించబడలేదు, ఇతర సమస్యలుగా నమోదు చేస్తున్నాం."
        }
        (Language::Te, Phrase::VoiceFallback) => {
            "ఎంచుకున్న భాషకు వాయిస్ లేదు, డిఫాల్ట్ వాయిస్ ఉపయోగిస్తున్నాం."
        }
        (Language::Te, Phrase::Submitting) => "మీ ఫిర్యాదును సమర్పిస్తున్నాం...",
        (Language::Te, Phrase::Submitted) => "ఫిర్యాదు విజయవంతంగా సమర్పించబడింది.",
        (Language::Te, Phrase::SubmissionFailed) => {
            "సమర్పణ విఫలమైంది. మళ్ళీ ప్రయత్నించడానికి ప్రాధాన్యతను మళ్ళీ చెప్పండి."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_question_has_both_prompts() {
        for language in [Language::En, Language::Te] {
            for step in [Step::Category, Step::Title, Step::Description, Step::Priority] {
                let initial = prompt(language, step, PromptKind::Initial).unwrap();
                let retry = prompt(language, step, PromptKind::Retry).unwrap();
                assert_ne!(initial, retry, "{:?} {:?}", language, step);
            }
        }
    }

    #[test]
    fn test_non_question_steps_have_no_prompt() {
        assert!(prompt(Language::En, Step::Locating, PromptKind::Initial).is_none());
        assert!(prompt(Language::En, Step::Submitting, PromptKind::Initial).is_none());
        assert!(prompt(Language::Te, Step::Done, PromptKind::Retry).is_none());
    }
}
