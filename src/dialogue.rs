//! 対話エンジン
//!
//! 1回の音声による苦情受付をステートマシンとして実行する。
//!
//! ```text
//! locating → category → title → description → priority → submitting → done
//!                ↺ 聞き直し                      ↑            │ 失敗
//!                                                └────────────┘
//! ```
//!
//! セッションを変更するのは [`DialogueEngine::advance`] だけ。アダプタ・タイマー・画面は
//! [`EventSink`] 経由でイベントを投入し、エンジンがキューから1つずつ処理する。
//!
//! 各質問ステップは同じターン手順を踏む:
//! 1. `speaking`: プロンプトを読み上げる
//! 2. `listening`: 読み上げ完了で聞き取りを開始する
//! 3. 部分結果は表示のみ。確定結果は1ターンに1つ
//! 4. `processing`: 回答を解析してステップを進める（または聞き直す）
//! 5. 発話なしで終わったら `idle` に戻り、タップでの再開を待つ
//!
//! 手動停止後は猶予時間だけ確定結果を待ち、届かなければ最良の部分結果を回答とする。
//! どちらが先でも、同じターンの完了は1回だけ。

use crate::capture::SpeechCapture;
use crate::config::{Config, DialogueConfig, NoSpeechPolicy};
use crate::error::{CaptureError, FlowError, LocationError, PlaybackError, SubmissionError};
use crate::event::{DialogueEvent, EventSink};
use crate::gateway::{generate_verification_token, SubmissionGateway};
use crate::location::LocationProvider;
use crate::parser;
use crate::playback::SpeechPlayback;
use crate::prompts::{self, Phrase, PromptKind};
use crate::session_view::{NoticeLevel, SessionView};
use crate::types::{
    Category, CollectedFields, ComplaintRecord, Language, LocationFix, Step, TurnId, TurnState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// セッションの終わり方
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// 送信に成功した
    Submitted { id: String },
    /// 利用者が中断した
    Cancelled,
    /// 位置情報が取得できず、言語選択に戻る
    LocationUnavailable,
}

/// エンジンが使う外部の協力者
pub struct Collaborators {
    pub capture: Box<dyn SpeechCapture>,
    pub playback: Box<dyn SpeechPlayback>,
    pub location: Arc<dyn LocationProvider>,
    pub gateway: Arc<dyn SubmissionGateway>,
}

/// 1回の受付セッション
#[derive(Clone, Debug)]
pub struct DialogueSession {
    pub step: Step,
    pub language: Language,
    pub collected: CollectedFields,
    pub turn_state: TurnState,
    pub location_fix: Option<LocationFix>,
    turn: TurnId,
    /// このターンの回答を処理済みか
    turn_completed: bool,
    /// このターンで手動停止が要求されたか
    stop_requested: bool,
    best_interim: Option<String>,
    /// 現在のステップでの聞き直し回数
    reasks: u32,
    /// 現在のステップでの自動再開回数
    auto_retries: u32,
    submitted_id: Option<String>,
}

impl DialogueSession {
    fn new(language: Language) -> Self {
        Self {
            step: Step::Locating,
            language,
            collected: CollectedFields::default(),
            turn_state: TurnState::Idle,
            location_fix: None,
            turn: TurnId::default(),
            turn_completed: false,
            stop_requested: false,
            best_interim: None,
            reasks: 0,
            auto_retries: 0,
            submitted_id: None,
        }
    }

    /// 現在のターン
    pub fn turn(&self) -> TurnId {
        self.turn
    }

    fn begin_turn(&mut self) -> TurnId {
        self.turn = self.turn.next();
        self.turn_completed = false;
        self.stop_requested = false;
        self.best_interim = None;
        self.turn
    }

    fn enter_step(&mut self, step: Step) {
        self.step = step;
        self.reasks = 0;
        self.auto_retries = 0;
    }

    fn build_record(&self, user_id: &str) -> Option<ComplaintRecord> {
        let now = chrono::Utc::now().to_rfc3339();
        Some(ComplaintRecord {
            user_id: user_id.to_string(),
            title: self.collected.title.clone()?,
            description: self.collected.description.clone()?,
            category: self.collected.category?,
            priority: self.collected.priority,
            status: "pending".to_string(),
            source: "voice".to_string(),
            location: self.location_fix.clone()?,
            images: Vec::new(),
            verification_token: generate_verification_token(),
            language: self.language,
            created_at: now.clone(),
            updated_at: now,
        })
    }
}

/// 対話エンジン
pub struct DialogueEngine {
    settings: DialogueConfig,
    user_id: String,
    location_timeout: Duration,
    language: Language,
    session: Option<DialogueSession>,
    /// 訪れたステップの履歴（セッション破棄後も残る）
    history: Vec<Step>,
    outcome: Option<Outcome>,
    capture: Box<dyn SpeechCapture>,
    playback: Box<dyn SpeechPlayback>,
    location: Arc<dyn LocationProvider>,
    gateway: Arc<dyn SubmissionGateway>,
    events: EventSink,
    view: SessionView,
    grace_timer: Option<JoinHandle<()>>,
    /// 位置情報・送信・完了表示のタスク
    tasks: Vec<JoinHandle<()>>,
}

impl DialogueEngine {
    /// エンジンを作成し、アダプタを言語に合わせて設定する
    pub fn new(
        config: &Config,
        language: Language,
        collaborators: Collaborators,
        events: EventSink,
        view: SessionView,
    ) -> Self {
        let Collaborators {
            mut capture,
            mut playback,
            location,
            gateway,
        } = collaborators;

        let locale = language.locale();
        if let Err(e) = capture.configure(locale) {
            log::warn!("音声認識の設定に失敗 ({}): {}", capture.name(), e);
        }

        let voice = playback.configure(locale);
        if voice.is_fallback() {
            log::warn!(
                "{} の声が見つからないため既定の声を使います: {}",
                locale,
                voice.voice()
            );
            view.update(|s| {
                s.push_notice(
                    NoticeLevel::Warning,
                    prompts::phrase(language, Phrase::VoiceFallback),
                )
            });
        }

        log::info!(
            "対話エンジン作成: language={}, capture={}, playback={}",
            language,
            capture.name(),
            playback.name()
        );

        Self {
            settings: config.dialogue.clone(),
            user_id: config.gateway.user_id.clone(),
            location_timeout: Duration::from_secs(config.location.timeout_secs),
            language,
            session: None,
            history: Vec::new(),
            outcome: None,
            capture,
            playback,
            location,
            gateway,
            events,
            view,
            grace_timer: None,
            tasks: Vec::new(),
        }
    }

    /// 現在のセッション（開始前・破棄後は `None`）
    pub fn session(&self) -> Option<&DialogueSession> {
        self.session.as_ref()
    }

    /// 訪れたステップの履歴
    pub fn history(&self) -> &[Step] {
        &self.history
    }

    /// 終了していればその結果
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// キューのイベントを終了まで処理する
    pub async fn run(&mut self, mut rx: mpsc::UnboundedReceiver<DialogueEvent>) -> Outcome {
        if self.session.is_none() && self.outcome.is_none() {
            self.events.post(DialogueEvent::Start);
        }

        while let Some(event) = rx.recv().await {
            self.advance(event);
            if let Some(outcome) = &self.outcome {
                return outcome.clone();
            }
        }

        log::warn!("イベントキューが閉じられました");
        self.cancel();
        self.outcome.clone().unwrap_or(Outcome::Cancelled)
    }

    /// イベントを1つ処理する
    pub fn advance(&mut self, event: DialogueEvent) {
        if self.outcome.is_some() {
            log::debug!("終了後のイベントを無視: {:?}", event);
            return;
        }

        if let Some(turn) = event.turn() {
            if !self.is_live_turn(turn) {
                log::debug!("古いターンのイベントを無視: {:?}", event);
                return;
            }
        }

        log::debug!("イベント: {:?}", event);

        match event {
            DialogueEvent::Start => self.start(),
            DialogueEvent::LocationAcquired(fix) => self.on_location_acquired(fix),
            DialogueEvent::LocationFailed(error) => self.on_location_failed(error),
            DialogueEvent::PlaybackFinished { .. } => self.on_playback_finished(),
            DialogueEvent::PlaybackFailed { error, .. } => self.on_playback_failed(error),
            DialogueEvent::InterimTranscript { text, .. } => self.on_interim(text),
            DialogueEvent::FinalTranscript { text, .. } => self.on_final(text),
            DialogueEvent::CaptureEnded { .. } => self.on_capture_ended(),
            DialogueEvent::CaptureFailed { error, .. } => self.on_capture_failed(error),
            DialogueEvent::Tap => self.on_tap(),
            DialogueEvent::ManualStop => self.manual_stop(),
            DialogueEvent::Retrigger => self.retrigger(),
            DialogueEvent::GraceWindowElapsed { .. } => self.on_grace_elapsed(),
            DialogueEvent::SubmissionSucceeded { id } => self.on_submitted(id),
            DialogueEvent::SubmissionFailed(error) => self.on_submission_failed(error),
            DialogueEvent::DisplayElapsed => self.on_display_elapsed(),
            DialogueEvent::Cancel => self.cancel(),
        }

        self.sync_view();
    }

    fn is_live_turn(&self, turn: TurnId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.turn == turn && !s.turn_completed)
    }

    fn turn_state(&self) -> Option<TurnState> {
        self.session.as_ref().map(|s| s.turn_state)
    }

    fn set_turn_state(&mut self, state: TurnState) {
        if let Some(session) = self.session.as_mut() {
            if session.turn_state != state {
                log::debug!("ターン状態: {:?} → {:?}", session.turn_state, state);
            }
            session.turn_state = state;
        }
    }

    fn sync_view(&self) {
        let Some(session) = &self.session else {
            return;
        };
        self.view.update(|s| {
            s.step = session.step;
            s.set_turn_state(session.turn_state);
            s.collected = session.collected.clone();
            s.location = session.location_fix.clone();
        });
    }

    fn notify(&self, level: NoticeLevel, phrase: Phrase) {
        let text = prompts::phrase(self.language, phrase);
        self.view.update(|s| s.push_notice(level, text));
    }

    fn start(&mut self) {
        if self.session.is_some() {
            log::debug!("セッションは開始済みです");
            return;
        }

        log::info!("セッション開始: language={}", self.language);
        self.session = Some(DialogueSession::new(self.language));
        self.history.push(Step::Locating);
        self.notify(NoticeLevel::Info, Phrase::Locating);

        let provider = self.location.clone();
        let events = self.events.clone();
        let timeout = self.location_timeout;
        self.tasks.push(tokio::spawn(async move {
            let event = match tokio::time::timeout(timeout, provider.locate()).await {
                Ok(Ok(fix)) => DialogueEvent::LocationAcquired(fix),
                Ok(Err(e)) => DialogueEvent::LocationFailed(e),
                Err(_) => DialogueEvent::LocationFailed(LocationError::Timeout),
            };
            events.post(event);
        }));
    }

    fn on_location_acquired(&mut self, fix: LocationFix) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.step != Step::Locating {
            return;
        }

        log::info!("位置情報: {}", fix.address);
        session.location_fix = Some(fix);
        self.advance_step();
    }

    fn on_location_failed(&mut self, error: LocationError) {
        if self.session.as_ref().map(|s| s.step) != Some(Step::Locating) {
            return;
        }

        log::warn!("位置情報の取得に失敗 ({:?}): {}", FlowError::from(&error), error);
        self.notify(NoticeLevel::Error, Phrase::LocationFailed);
        self.session = None;
        self.finish(Outcome::LocationUnavailable);
    }

    /// 次のステップへ進む
    fn advance_step(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let next = session.step.next();
        log::info!("ステップ: {:?} → {:?}", session.step, next);
        session.enter_step(next);
        self.history.push(next);

        if next.is_question() {
            self.ask(PromptKind::Initial);
        } else if next == Step::Submitting {
            self.submit();
        }
    }

    /// 現在のステップの質問を読み上げる（新しいターンを始める）
    fn ask(&mut self, kind: PromptKind) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(text) = prompts::prompt(session.language, session.step, kind) else {
            return;
        };

        let turn = session.begin_turn();
        session.turn_state = TurnState::Speaking;
        log::debug!("ターン {}: 読み上げ {:?} ({:?})", turn, session.step, kind);

        self.view.update(|s| {
            s.prompt = Some(text.to_string());
            s.last_answer = None;
        });

        if let Err(e) = self.playback.speak(text, self.events.for_turn(turn)) {
            self.on_playback_failed(e);
        }
    }

    fn on_playback_failed(&mut self, error: PlaybackError) {
        log::warn!(
            "読み上げ失敗、完了として扱います ({:?}): {}",
            FlowError::from(&error),
            error
        );
        self.on_playback_finished();
    }

    fn on_playback_finished(&mut self) {
        if self.turn_state() != Some(TurnState::Speaking) {
            return;
        }
        self.begin_listening();
    }

    /// 聞き取りを開始
    fn begin_listening(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let turn = session.turn;
        session.turn_state = TurnState::Listening;

        log::debug!("ターン {}: 聞き取り開始 ({})", turn, self.capture.name());
        if let Err(e) = self.capture.start(self.events.for_turn(turn)) {
            log::warn!(
                "ターン {}: 聞き取りを開始できません ({:?}): {}",
                turn,
                FlowError::from(&e),
                e
            );
            self.notify(NoticeLevel::Error, Phrase::CaptureFailed);
            self.set_turn_state(TurnState::Idle);
        }
    }

    fn on_interim(&mut self, text: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.turn_state != TurnState::Listening {
            return;
        }
        if !text.trim().is_empty() {
            session.best_interim = Some(text.clone());
            self.view.update(|s| s.interim = Some(text));
        }
    }

    fn on_final(&mut self, text: String) {
        if self.turn_state() != Some(TurnState::Listening) {
            return;
        }
        self.complete_turn(text);
    }

    fn on_capture_ended(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.turn_state != TurnState::Listening {
            return;
        }

        if session.stop_requested {
            // 確定結果はもう来ないので猶予を待たない
            self.complete_from_interim();
        } else {
            self.on_no_speech();
        }
    }

    fn on_capture_failed(&mut self, error: CaptureError) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.turn_state != TurnState::Listening {
            return;
        }

        if session.stop_requested {
            self.complete_from_interim();
            return;
        }

        match error {
            CaptureError::NoSpeech => self.on_no_speech(),
            error => {
                log::warn!(
                    "ターン {}: 聞き取りエラー ({:?}): {}",
                    session.turn,
                    FlowError::from(&error),
                    error
                );
                self.capture.abort();
                self.notify(NoticeLevel::Error, Phrase::CaptureFailed);
                self.set_turn_state(TurnState::Idle);
            }
        }
    }

    /// 発話なしで聞き取りが終わった
    fn on_no_speech(&mut self) {
        self.capture.abort();

        let max_auto_retries = self.settings.max_auto_retries;
        let auto_retry = self.settings.no_speech_policy == NoSpeechPolicy::AutoRetry;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if auto_retry && session.auto_retries < max_auto_retries {
            session.auto_retries += 1;
            log::info!(
                "発話なし、聞き取りを再開します ({}/{})",
                session.auto_retries,
                max_auto_retries
            );
            session.turn_state = TurnState::Idle;
            self.retrigger();
            return;
        }

        log::info!("発話なし、タップを待ちます");
        session.turn_state = TurnState::Idle;
        self.notify(NoticeLevel::Warning, Phrase::NoSpeech);
    }

    fn on_tap(&mut self) {
        match self.turn_state() {
            Some(TurnState::Listening) => self.manual_stop(),
            Some(TurnState::Idle) => self.retrigger(),
            state => log::debug!("タップを無視: {:?}", state),
        }
    }

    /// 手動停止（猶予時間のタイマーを開始）
    fn manual_stop(&mut self) {
        let grace = Duration::from_millis(self.settings.grace_window_ms);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.turn_state != TurnState::Listening || session.stop_requested {
            return;
        }

        session.stop_requested = true;
        let turn = session.turn;
        log::debug!("ターン {}: 手動停止、{}ms 確定結果を待ちます", turn, grace.as_millis());

        self.capture.stop();

        let events = self.events.clone();
        if let Some(timer) = self.grace_timer.replace(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            events.post(DialogueEvent::GraceWindowElapsed { turn });
        })) {
            timer.abort();
        }
    }

    fn on_grace_elapsed(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.turn_state != TurnState::Listening || !session.stop_requested {
            return;
        }
        log::debug!("ターン {}: 猶予時間経過、部分結果で確定します", session.turn);
        self.complete_from_interim();
    }

    fn complete_from_interim(&mut self) {
        let text = self
            .session
            .as_ref()
            .and_then(|s| s.best_interim.clone())
            .unwrap_or_default();
        self.complete_turn(text);
    }

    /// アイドルから聞き取りを再開（新しいターン、読み上げなし）
    fn retrigger(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.turn_state != TurnState::Idle || !session.step.is_question() {
            return;
        }

        let turn = session.begin_turn();
        log::debug!("ターン {}: 聞き取り再開", turn);
        self.begin_listening();
    }

    /// ターンを完了して回答を処理する（1ターンにつき1回）
    fn complete_turn(&mut self, text: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.turn_completed {
            return;
        }

        session.turn_completed = true;
        session.turn_state = TurnState::Processing;
        log::info!("ターン {}: 回答 {:?}", session.turn, text);

        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
        self.capture.abort();

        let answer = text.trim().to_string();
        self.view.update(|s| s.last_answer = Some(answer.clone()));
        self.process_answer(&answer);
    }

    fn process_answer(&mut self, answer: &str) {
        let max_reasks = self.settings.max_category_reasks;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.step {
            Step::Category => match parser::parse_category(answer, session.language) {
                Some(category) => {
                    session.collected.category = Some(category);
                    self.advance_step();
                }
                None if session.reasks < max_reasks => {
                    session.reasks += 1;
                    log::info!(
                        "カテゴリを認識できません、聞き直します ({}/{}, {:?})",
                        session.reasks,
                        max_reasks,
                        FlowError::ReaskStep
                    );
                    self.ask(PromptKind::Retry);
                }
                None => {
                    log::info!("聞き直しの上限に達したため {:?} とします", Category::Others);
                    session.collected.category = Some(Category::Others);
                    self.notify(NoticeLevel::Warning, Phrase::CategoryFallback);
                    self.advance_step();
                }
            },
            Step::Title | Step::Description => match parser::parse_free_text(answer) {
                Some(text) => {
                    if session.step == Step::Title {
                        session.collected.title = Some(text);
                    } else {
                        session.collected.description = Some(text);
                    }
                    self.advance_step();
                }
                None if session.reasks < max_reasks => {
                    session.reasks += 1;
                    log::info!("空の回答、聞き直します ({}/{})", session.reasks, max_reasks);
                    self.ask(PromptKind::Retry);
                }
                None => {
                    log::info!("空の回答が続いたため、タップを待ちます");
                    session.turn_state = TurnState::Idle;
                    self.notify(NoticeLevel::Warning, Phrase::NoSpeech);
                }
            },
            Step::Priority => {
                let priority = parser::parse_priority(answer, session.language);
                log::debug!("優先度: {:?} ({:?})", priority, FlowError::DefaultValue);
                session.collected.priority = priority;
                self.advance_step();
            }
            step => log::warn!("質問ではないステップで回答を受け取りました: {:?}", step),
        }
    }

    /// レコードを送信（このステップへの進入ごとに1回）
    fn submit(&mut self) {
        let user_id = self.user_id.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.turn_state = TurnState::Processing;

        let Some(record) = session.build_record(&user_id) else {
            log::error!("収集済みの項目が不足しています: {:?}", session.collected);
            self.session = None;
            self.finish(Outcome::LocationUnavailable);
            return;
        };

        log::info!(
            "送信: category={:?}, priority={:?}, token={}",
            record.category,
            record.priority,
            record.verification_token
        );
        self.notify(NoticeLevel::Info, Phrase::Submitting);

        let gateway = self.gateway.clone();
        let events = self.events.clone();
        self.tasks.push(tokio::spawn(async move {
            let event = match gateway.create(&record).await {
                Ok(id) => DialogueEvent::SubmissionSucceeded { id },
                Err(e) => DialogueEvent::SubmissionFailed(e),
            };
            events.post(event);
        }));
    }

    fn on_submitted(&mut self, id: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.step != Step::Submitting {
            return;
        }

        log::info!("送信成功: id={}", id);
        session.enter_step(Step::Done);
        session.turn_state = TurnState::Idle;
        session.submitted_id = Some(id);
        self.history.push(Step::Done);
        self.notify(NoticeLevel::Success, Phrase::Submitted);

        let display = Duration::from_millis(self.settings.done_display_ms);
        let events = self.events.clone();
        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(display).await;
            events.post(DialogueEvent::DisplayElapsed);
        }));
    }

    fn on_submission_failed(&mut self, error: SubmissionError) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.step != Step::Submitting {
            return;
        }

        log::warn!("送信失敗 ({:?}): {}", FlowError::from(&error), error);
        session.enter_step(Step::Priority);
        self.history.push(Step::Priority);
        self.notify(NoticeLevel::Error, Phrase::SubmissionFailed);
        self.ask(PromptKind::Retry);
    }

    fn on_display_elapsed(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.step != Step::Done {
            return;
        }
        let id = session.submitted_id.clone().unwrap_or_default();
        self.finish(Outcome::Submitted { id });
    }

    /// 中断（再生と聞き取りを止め、タイマーとタスクを破棄してセッションを捨てる）
    fn cancel(&mut self) {
        log::info!("中断しました ({:?})", FlowError::UserAbort);
        self.playback.cancel();
        self.capture.abort();
        self.session = None;
        self.finish(Outcome::Cancelled);
    }

    fn finish(&mut self, outcome: Outcome) {
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.capture.abort();

        log::info!("セッション終了: {:?}", outcome);
        let summary = match &outcome {
            Outcome::Submitted { id } => format!(
                "{} (ID: {})",
                prompts::phrase(self.language, Phrase::Submitted),
                id
            ),
            Outcome::Cancelled => "Cancelled".to_string(),
            Outcome::LocationUnavailable => {
                prompts::phrase(self.language, Phrase::LocationFailed).to_string()
            }
        };
        self.view.update(|s| {
            s.set_turn_state(TurnState::Idle);
            s.outcome = Some(summary);
        });
        self.outcome = Some(outcome);
    }
}

impl Drop for DialogueEngine {
    fn drop(&mut self) {
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
