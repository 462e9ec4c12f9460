use crate::event::{DialogueEvent, EventSink};
use crate::session_view::{NoticeLevel, SessionView, ViewState};
use crate::types::{Language, Step, TurnState};
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

/// 進捗バーに表示するステップ
const PROGRESS_STEPS: [Step; 7] = [
    Step::Locating,
    Step::Category,
    Step::Title,
    Step::Description,
    Step::Priority,
    Step::Submitting,
    Step::Done,
];

/// TUIアプリケーション
///
/// 表示状態を描画し、キー入力をエンジンへのイベントに変換する。
/// セッションを直接操作することはない。
pub struct TuiApp {
    view: SessionView,
    events: EventSink,
    running: Arc<AtomicBool>,
}

impl TuiApp {
    pub fn new(view: SessionView, events: EventSink, running: Arc<AtomicBool>) -> Self {
        Self {
            view,
            events,
            running,
        }
    }

    /// TUIを起動（`running` が下りるまでブロックする）
    pub fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        loop {
            terminal.draw(|f| self.draw(f))?;

            // イベントをポーリング（200msごと）
            if event::poll(Duration::from_millis(200))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            self.events.post(DialogueEvent::Cancel);
                        }
                        KeyCode::Char('z') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            // Ctrl+Z でプロセスを一時停止
                            disable_raw_mode()?;
                            execute!(io::stdout(), LeaveAlternateScreen)?;

                            #[cfg(unix)]
                            {
                                use nix::sys::signal::{self, Signal};
                                let _ = signal::raise(Signal::SIGTSTP);
                            }

                            // 再開後にターミナルを再初期化
                            enable_raw_mode()?;
                            execute!(io::stdout(), EnterAlternateScreen)?;
                            terminal.clear()?;
                        }
                        KeyCode::Char('q') | KeyCode::Esc => {
                            self.events.post(DialogueEvent::Cancel);
                        }
                        KeyCode::Char(' ') | KeyCode::Enter => {
                            self.events.post(DialogueEvent::Tap);
                        }
                        _ => {}
                    }
                }
            }

            if !self.running.load(Ordering::SeqCst) || self.events.is_closed() {
                break;
            }
        }

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        Ok(())
    }

    /// 画面を描画
    fn draw(&self, f: &mut Frame) {
        let state = self.view.snapshot();

        let block = Block::default()
            .title(format!(
                "civic-voice-intake - {}",
                language_name(state.language)
            ))
            .borders(Borders::ALL)
            .style(Style::default().fg(Color::White));

        let inner_area = block.inner(f.area());
        f.render_widget(block, f.area());

        let sections = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // 進捗
                Constraint::Length(1), // ターン状態
                Constraint::Length(4), // プロンプトと回答
                Constraint::Length(7), // 収集済み項目
                Constraint::Min(0),    // お知らせ
                Constraint::Length(1), // 操作説明
            ])
            .split(inner_area);

        self.draw_progress(f, sections[0], &state);
        self.draw_status(f, sections[1], &state);
        self.draw_dialogue(f, sections[2], &state);
        self.draw_collected(f, sections[3], &state);
        self.draw_notices(f, sections[4], &state);

        let help = Paragraph::new("Space/Enter: マイク  Esc/q: 中断  Ctrl+Z: 一時停止")
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(help, sections[5]);
    }

    /// ステップの進捗バーを描画
    fn draw_progress(&self, f: &mut Frame, area: Rect, state: &ViewState) {
        let label = format!("ステップ: {}", step_name(state.step));
        let gauge = Gauge::default()
            .label(label)
            .gauge_style(Style::default().fg(Color::Cyan))
            .ratio(step_ratio(state.step));
        f.render_widget(gauge, area);
    }

    /// ターン状態を描画
    fn draw_status(&self, f: &mut Frame, area: Rect, state: &ViewState) {
        let (color, text) = match state.turn_state {
            TurnState::Idle => (Color::Gray, "待機中"),
            TurnState::Speaking => (Color::Yellow, "読み上げ中"),
            TurnState::Listening => (Color::Blue, "聞き取り中"),
            TurnState::Processing => (Color::Magenta, "処理中"),
        };

        let mut spans = vec![
            Span::styled("状態: ", Style::default().fg(Color::White)),
            Span::styled(
                format!("{} ({:.1}秒)", text, state.turn_state_secs()),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
        ];

        if let Some(location) = &state.location {
            spans.push(Span::raw("  "));
            spans.push(Span::styled("位置: ", Style::default().fg(Color::White)));
            spans.push(Span::raw(location.address.clone()));
        }

        f.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    /// プロンプトと回答を描画
    fn draw_dialogue(&self, f: &mut Frame, area: Rect, state: &ViewState) {
        let mut lines = Vec::new();

        if let Some(outcome) = &state.outcome {
            lines.push(Line::from(Span::styled(
                outcome.clone(),
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            )));
        } else if let Some(prompt) = &state.prompt {
            lines.push(Line::from(vec![
                Span::styled("Q: ", Style::default().fg(Color::Yellow)),
                Span::raw(prompt.clone()),
            ]));
        }

        if let Some(interim) = &state.interim {
            lines.push(Line::from(vec![
                Span::styled("… ", Style::default().fg(Color::Blue)),
                Span::styled(
                    interim.clone(),
                    Style::default().add_modifier(Modifier::ITALIC),
                ),
            ]));
        } else if let Some(answer) = &state.last_answer {
            lines.push(Line::from(vec![
                Span::styled("A: ", Style::default().fg(Color::Green)),
                Span::raw(answer.clone()),
            ]));
        }

        let paragraph = Paragraph::new(Text::from(lines))
            .block(Block::default().borders(Borders::TOP))
            .wrap(Wrap { trim: false });
        f.render_widget(paragraph, area);
    }

    /// 収集済みの項目を描画
    fn draw_collected(&self, f: &mut Frame, area: Rect, state: &ViewState) {
        let language = state.language;
        let collected = &state.collected;
        let field = |name: &'static str, value: Option<String>| {
            Line::from(vec![
                Span::styled(format!("{:<12}", name), Style::default().fg(Color::White)),
                match value {
                    Some(value) => Span::raw(value),
                    None => Span::styled("-", Style::default().fg(Color::DarkGray)),
                },
            ])
        };

        // 優先度は既定値があるので、そのステップを過ぎてから表示する
        let priority_answered = step_ratio(state.step) > step_ratio(Step::Priority);

        let lines = vec![
            field(
                "category",
                collected.category.map(|c| c.label(language).to_string()),
            ),
            field("title", collected.title.clone()),
            field("description", collected.description.clone()),
            field(
                "priority",
                priority_answered.then(|| collected.priority.label(language).to_string()),
            ),
        ];

        let paragraph = Paragraph::new(Text::from(lines))
            .block(Block::default().title("収集済み").borders(Borders::TOP))
            .wrap(Wrap { trim: true });
        f.render_widget(paragraph, area);
    }

    /// お知らせを描画
    fn draw_notices(&self, f: &mut Frame, area: Rect, state: &ViewState) {
        let lines: Vec<Line> = state
            .notices
            .iter()
            .rev() // 最新が上
            .map(|notice| {
                let color = match notice.level {
                    NoticeLevel::Info => Color::White,
                    NoticeLevel::Success => Color::Green,
                    NoticeLevel::Warning => Color::Yellow,
                    NoticeLevel::Error => Color::Red,
                };
                Line::from(vec![
                    Span::styled(
                        format!("[{}] ", notice.time),
                        Style::default().fg(color).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(notice.text.clone(), Style::default().fg(color)),
                ])
            })
            .collect();

        let paragraph = Paragraph::new(Text::from(lines))
            .block(Block::default().title("お知らせ").borders(Borders::TOP))
            .wrap(Wrap { trim: false });
        f.render_widget(paragraph, area);
    }
}

fn language_name(language: Language) -> &'static str {
    match language {
        Language::En => "English",
        Language::Te => "తెలుగు",
    }
}

fn step_name(step: Step) -> &'static str {
    match step {
        Step::Locating => "位置情報",
        Step::Category => "カテゴリ",
        Step::Title => "タイトル",
        Step::Description => "詳細",
        Step::Priority => "優先度",
        Step::Submitting => "送信中",
        Step::Done => "完了",
    }
}

/// ステップを0.0～1.0の進捗に変換
fn step_ratio(step: Step) -> f64 {
    let index = PROGRESS_STEPS
        .iter()
        .position(|s| *s == step)
        .unwrap_or_default();
    index as f64 / (PROGRESS_STEPS.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_ratio() {
        assert_eq!(step_ratio(Step::Locating), 0.0);
        assert_eq!(step_ratio(Step::Done), 1.0);
        assert!(step_ratio(Step::Title) < step_ratio(Step::Description));
    }
}
