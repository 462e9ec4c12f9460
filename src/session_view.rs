use crate::types::{CollectedFields, Language, LocationFix, Step, TurnState};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// 保持するお知らせの最大件数
const MAX_NOTICES: usize = 10;

/// お知らせの種類
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// 画面に表示するお知らせ
#[derive(Clone, Debug)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
    /// 時刻（時:分:秒）
    pub time: String,
}

/// 対話の表示用状態
///
/// エンジンだけが書き込み、画面は `snapshot` で読む。
#[derive(Clone, Debug)]
pub struct ViewState {
    pub language: Language,
    pub step: Step,
    pub turn_state: TurnState,
    /// 現在の状態に入った時刻
    turn_state_since: Instant,
    /// 現在読み上げている（または最後に読み上げた）プロンプト
    pub prompt: Option<String>,
    /// 聞き取り中の部分結果
    pub interim: Option<String>,
    /// 直前に確定した回答
    pub last_answer: Option<String>,
    pub collected: CollectedFields,
    pub location: Option<LocationFix>,
    pub notices: VecDeque<Notice>,
    /// 終了時の結果表示
    pub outcome: Option<String>,
}

impl ViewState {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            step: Step::Locating,
            turn_state: TurnState::Idle,
            turn_state_since: Instant::now(),
            prompt: None,
            interim: None,
            last_answer: None,
            collected: CollectedFields::default(),
            location: None,
            notices: VecDeque::new(),
            outcome: None,
        }
    }

    /// ターン状態を更新（変わった時だけ経過時間をリセット）
    pub fn set_turn_state(&mut self, state: TurnState) {
        if self.turn_state != state {
            self.turn_state_since = Instant::now();
        }
        self.turn_state = state;
        if state != TurnState::Listening {
            self.interim = None;
        }
    }

    /// 現在のターン状態の継続時間（秒）
    pub fn turn_state_secs(&self) -> f64 {
        self.turn_state_since.elapsed().as_secs_f64()
    }

    /// お知らせを追加
    pub fn push_notice(&mut self, level: NoticeLevel, text: impl Into<String>) {
        self.notices.push_back(Notice {
            level,
            text: text.into(),
            time: chrono::Local::now().format("%H:%M:%S").to_string(),
        });

        while self.notices.len() > MAX_NOTICES {
            self.notices.pop_front();
        }
    }
}

/// エンジンと画面で共有する表示状態
#[derive(Clone)]
pub struct SessionView {
    state: Arc<Mutex<ViewState>>,
}

impl SessionView {
    pub fn new(language: Language) -> Self {
        Self {
            state: Arc::new(Mutex::new(ViewState::new(language))),
        }
    }

    /// 状態を更新
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ViewState),
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }

    /// 現在の状態のコピーを取得
    pub fn snapshot(&self) -> ViewState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notices_are_bounded() {
        let view = SessionView::new(Language::En);
        for i in 0..15 {
            view.update(|s| s.push_notice(NoticeLevel::Info, format!("notice {}", i)));
        }

        let snapshot = view.snapshot();
        assert_eq!(snapshot.notices.len(), MAX_NOTICES);
        assert_eq!(snapshot.notices.front().unwrap().text, "notice 5");
        assert_eq!(snapshot.notices.back().unwrap().text, "notice 14");
    }

    #[test]
    fn test_interim_cleared_when_leaving_listening() {
        let view = SessionView::new(Language::Te);
        view.update(|s| {
            s.set_turn_state(TurnState::Listening);
            s.interim = Some("చెత్త".to_string());
        });
        assert!(view.snapshot().interim.is_some());

        view.update(|s| s.set_turn_state(TurnState::Processing));
        let snapshot = view.snapshot();
        assert_eq!(snapshot.turn_state, TurnState::Processing);
        assert!(snapshot.interim.is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let view = SessionView::new(Language::En);
        let other = view.clone();
        other.update(|s| s.step = Step::Title);
        assert_eq!(view.snapshot().step, Step::Title);
    }
}
