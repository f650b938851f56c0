use clap::Parser;
use clap::ValueEnum;
use localchat_core::protocol::ModelVariant;

use crate::config_override::CliConfigOverrides;

#[derive(Parser, Debug)]
#[command(version, about = "Chat with a local Ollama model from the terminal")]
pub struct Cli {
    /// Optional user prompt to start the session.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Model size to start with.
    #[arg(long, short = 'm', value_enum)]
    pub model: Option<ModelArg>,

    /// Base URL of the Ollama server, e.g. http://localhost:11434.
    #[arg(long = "base-url", value_name = "URL")]
    pub base_url: Option<String>,

    /// Log at info level to ~/.localchat/log/localchat-tui.log.
    #[clap(long = "debug", short = 'd', default_value_t = false)]
    pub debug: bool,

    #[clap(flatten)]
    pub config_overrides: CliConfigOverrides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelArg {
    Small,
    Large,
}

impl From<ModelArg> for ModelVariant {
    fn from(value: ModelArg) -> Self {
        match value {
            ModelArg::Small => ModelVariant::Small,
            ModelArg::Large => ModelVariant::Large,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_flags_and_overrides() {
        let cli = Cli::parse_from([
            "localchat",
            "--model",
            "large",
            "--base-url",
            "http://phone:11434",
            "-c",
            "stats_refresh_secs=2",
            "why is the sky blue?",
        ]);
        assert_eq!(cli.prompt.as_deref(), Some("why is the sky blue?"));
        assert_eq!(cli.model.map(ModelVariant::from), Some(ModelVariant::Large));
        assert_eq!(cli.base_url.as_deref(), Some("http://phone:11434"));
        assert_eq!(
            cli.config_overrides.raw_overrides,
            vec!["stats_refresh_secs=2".to_string()]
        );
        assert!(!cli.debug);
    }
}
