// Forbid accidental stdout/stderr writes in the *library* portion of the TUI.
// Errors before the alternate screen starts, and after it ends, opt out
// locally via `allow`.
#![deny(clippy::print_stdout, clippy::print_stderr)]
use std::fs::OpenOptions;
use std::sync::Arc;

use app::App;
use localchat_core::Config;
use localchat_core::ConfigOverrides;
use localchat_core::Session;
use localchat_ollama::OllamaClient;
use tracing_appender::non_blocking;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod app;
mod app_event;
mod app_event_sender;
mod chat_view;
mod cli;
mod clipboard;
mod composer;
mod config_override;
mod markdown;
mod markdown_render;
mod sidebar;
mod spinner;
mod tui;

pub use cli::Cli;
pub use cli::ModelArg;
pub use config_override::CliConfigOverrides;

pub async fn run_main(cli: Cli) -> std::io::Result<()> {
    let cli_kv_overrides = match cli.config_overrides.parse_overrides() {
        Ok(v) => v,
        #[allow(clippy::print_stderr)]
        Err(e) => {
            eprintln!("Error parsing -c overrides: {e}");
            std::process::exit(1);
        }
    };

    let overrides = ConfigOverrides {
        base_url: cli.base_url.clone(),
        default_variant: cli.model.map(Into::into),
    };

    let config = {
        #[allow(clippy::print_stderr)]
        match Config::load_with_cli_overrides(cli_kv_overrides, overrides) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Error loading configuration: {err}");
                std::process::exit(1);
            }
        }
    };

    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let mut log_file_opts = OpenOptions::new();
    log_file_opts.create(true).append(true);

    // Logs may contain prompts, so keep them private to the user.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        log_file_opts.mode(0o600);
    }

    let log_file = log_file_opts.open(log_dir.join("localchat-tui.log"))?;

    let (non_blocking, _guard) = non_blocking(log_file);

    let default_filter = if cli.debug {
        "localchat_core=info,localchat_ollama=info,localchat_tui=info"
    } else {
        "localchat_core=warn,localchat_ollama=warn,localchat_tui=warn"
    };

    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(false)
        .with_filter(env_filter());

    let _ = tracing_subscriber::registry().with(file_layer).try_init();

    tracing::info!(
        "starting localchat against {} ({} / {})",
        config.base_url,
        config.small_model,
        config.large_model
    );

    let client = OllamaClient::from_config(&config);
    let session = Session::new(&config, Arc::new(client.clone()));

    let result = run_ratatui_app(cli.prompt, config, client, session);
    let (app_result, mut session) = match result {
        Ok(pair) => pair,
        Err(err) => return Err(std::io::Error::other(err.to_string())),
    };
    session.shutdown().await;
    app_result.map_err(|err| std::io::Error::other(err.to_string()))
}

type AppOutcome = (color_eyre::Result<()>, Session);

fn run_ratatui_app(
    prompt: Option<String>,
    config: Config,
    client: OllamaClient,
    session: Session,
) -> color_eyre::Result<AppOutcome> {
    color_eyre::install()?;

    // Forward panic reports through tracing, then chain to the previous hook
    // so the user still gets a rich report after the terminal is restored.
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("panic: {info}");
        prev_hook(info);
    }));

    let mut terminal = tui::init()?;

    let mut app = App::new(config, client, session, prompt);
    let app_result = app.run(&mut terminal);

    restore();

    Ok((app_result, app.into_session()))
}

#[expect(
    clippy::print_stderr,
    reason = "TUI should no longer be displayed, so we can write to stderr."
)]
fn restore() {
    if let Err(err) = tui::restore() {
        eprintln!(
            "failed to restore terminal. Run `reset` or restart your terminal to recover: {err}"
        );
    }
}
