use anyhow::{Context, Result};
use civic_voice_intake::audio_input::AudioInput;
use civic_voice_intake::audio_output::AudioOutput;
use civic_voice_intake::config::{Config, OutputConfig};
use civic_voice_intake::dialogue::{Collaborators, DialogueEngine, Outcome};
use civic_voice_intake::event::{self, DialogueEvent};
use civic_voice_intake::gateway::{HttpDocumentStore, MemoryDocumentStore, SubmissionGateway};
use civic_voice_intake::session_view::SessionView;
use civic_voice_intake::tui::TuiApp;
use civic_voice_intake::types::Language;
use civic_voice_intake::{capture, location, playback};
use env_logger::{Env, Target};
use std::fs::File;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// コマンドライン引数
struct Args {
    config_path: String,
    language: Option<Language>,
    user_id: Option<String>,
    dry_run: bool,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args {
        config_path: "config.toml".to_string(),
        language: None,
        user_id: None,
        dry_run: false,
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--lang" => {
                let code = iter.next().context("--lang には en または te を指定してください")?;
                let language = Language::from_code(code)
                    .with_context(|| format!("未対応の言語です: {}", code))?;
                parsed.language = Some(language);
            }
            "--user" => {
                let user = iter.next().context("--user にはIDを指定してください")?;
                parsed.user_id = Some(user.clone());
            }
            "--dry-run" => parsed.dry_run = true,
            other if other.starts_with("--") => anyhow::bail!("不明なオプション: {}", other),
            path => parsed.config_path = path.to_string(),
        }
    }

    Ok(parsed)
}

/// ロガーを初期化（画面をTUIが使うためログはファイルへ）
fn init_logger(output: &OutputConfig) -> Result<()> {
    let file = File::create(&output.log_file)
        .with_context(|| format!("ログファイルを作成できません: {}", output.log_file))?;

    env_logger::Builder::from_env(Env::default().default_filter_or(output.log_level.as_str()))
        .target(Target::Pipe(Box::new(file)))
        .filter_module("reqwest", log::LevelFilter::Warn)
        .filter_module("hyper_util", log::LevelFilter::Warn)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // デバイス一覧表示モード
    if args.len() > 1 && args[1] == "--show-interfaces" {
        AudioInput::list_devices()?;
        AudioOutput::list_devices()?;
        return Ok(());
    }

    // 設定ファイル生成モード
    if args.len() > 1 && args[1] == "--generate-config" {
        let config_path = if args.len() > 2 {
            &args[2]
        } else {
            "config.toml"
        };
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    let cli = parse_args(&args)?;

    let mut config = Config::load_or_default(&cli.config_path)?;
    if let Some(language) = cli.language {
        config.dialogue.language = language;
    }
    if let Some(user_id) = cli.user_id {
        config.gateway.user_id = user_id;
    }

    init_logger(&config.output)?;

    log::info!("civic-voice-intake を起動します");
    log::debug!("設定: {:?}", config);

    let language = config.dialogue.language;

    let gateway: Arc<dyn SubmissionGateway> = if cli.dry_run {
        log::info!("ドライラン: 送信はメモリに保存されます");
        Arc::new(MemoryDocumentStore::new())
    } else {
        Arc::new(HttpDocumentStore::new(&config.gateway)?)
    };

    let collaborators = Collaborators {
        capture: capture::detect(&config),
        playback: playback::detect(&config),
        location: location::from_config(&config.location)?,
        gateway,
    };

    let (events, rx) = event::channel();
    let view = SessionView::new(language);

    // Ctrl+C ハンドラを設定（TUIの外で受けたシグナルも中断として扱う）
    let running = Arc::new(AtomicBool::new(true));
    let cancel_sink = events.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        cancel_sink.post(DialogueEvent::Cancel);
    })?;

    let mut engine = DialogueEngine::new(
        &config,
        language,
        collaborators,
        events.clone(),
        view.clone(),
    );

    let mut tui = TuiApp::new(view, events, running.clone());
    let tui_task = tokio::task::spawn_blocking(move || tui.run());

    let outcome = engine.run(rx).await;

    running.store(false, Ordering::SeqCst);
    drop(engine);
    match tui_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("TUIエラー: {:#}", e),
        Err(e) => log::error!("TUIタスクエラー: {}", e),
    }

    match &outcome {
        Outcome::Submitted { id } => println!("苦情を登録しました: {}", id),
        Outcome::Cancelled => println!("中断しました"),
        Outcome::LocationUnavailable => {
            println!("位置情報を取得できませんでした。位置情報の設定を確認してください。")
        }
    }

    log::info!("civic-voice-intake を終了しました: {:?}", outcome);

    Ok(())
}
