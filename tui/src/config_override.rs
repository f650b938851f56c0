//! Support for `-c key=value` overrides.
//!
//! Each occurrence of `-c key=value` (or `--config key=value`) is collected as
//! a raw string and converted into a dotted path plus a TOML value that is
//! layered over `config.toml`.

use clap::ArgAction;
use clap::Parser;
use toml::Value;

#[derive(Parser, Debug, Default, Clone)]
pub struct CliConfigOverrides {
    /// Override a configuration value that would otherwise be loaded from
    /// `~/.localchat/config.toml`. Use a dotted path (`foo.bar.baz`) to
    /// override nested values. The `value` portion is parsed as TOML. If it
    /// fails to parse as TOML, the raw string is used as a literal.
    ///
    /// Examples:
    ///   - `-c large_model="deepseek-r1:8b"`
    ///   - `-c stream_idle_timeout_secs=60`
    ///   - `-c optimize_command=my-tuner`
    #[arg(
        short = 'c',
        long = "config",
        value_name = "key=value",
        action = ArgAction::Append,
        global = true,
    )]
    pub raw_overrides: Vec<String>,
}

impl CliConfigOverrides {
    /// Parse the raw strings captured from the CLI into a list of `(path,
    /// value)` tuples.
    pub fn parse_overrides(&self) -> Result<Vec<(String, Value)>, String> {
        self.raw_overrides
            .iter()
            .map(|s| {
                // Only split on the *first* '=' so values are free to contain
                // the character.
                let mut parts = s.splitn(2, '=');
                let key = match parts.next() {
                    Some(k) => k.trim(),
                    None => return Err("Override missing key".to_string()),
                };
                let value_str = parts
                    .next()
                    .ok_or_else(|| format!("Invalid override (missing '='): {s}"))?
                    .trim();

                if key.is_empty() {
                    return Err(format!("Empty key in override: {s}"));
                }

                // `-c optimize_command=my-tuner` works without quotes.
                let value = parse_toml_value(value_str)
                    .unwrap_or_else(|| Value::String(value_str.to_string()));

                Ok((key.to_string(), value))
            })
            .collect()
    }
}

fn parse_toml_value(raw: &str) -> Option<Value> {
    let wrapped = format!("_x_ = {raw}");
    let table: toml::Table = toml::from_str(&wrapped).ok()?;
    table.get("_x_").cloned()
}
