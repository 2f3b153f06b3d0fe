//! Argument parsing and reply formatting for the `redis-shard` binary.
//!
//! ```text
//! redis-shard --config <file> [--temp-hash <suffix>] <VERB> [ARGS...]
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::resp::RespValue;

#[derive(Error, Debug, PartialEq)]
pub enum CliError {
    #[error("invalid command line flag {0}")]
    InvalidCommandLineFlag(String),
    #[error("missing value for {0}")]
    MissingFlagValue(String),
    #[error("--config is required")]
    MissingConfig,
    #[error("no command given")]
    MissingCommand,
}

#[derive(Debug, PartialEq)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub temp_hash: Option<String>,
    pub verb: String,
    pub args: Vec<String>,
}

impl CliArgs {
    /// Parses `std::env::args()`-style input; the first item is the program
    /// name. Flags come before the command, everything after the command
    /// verb is passed through as arguments.
    pub fn parse<I: IntoIterator<Item = String>>(command_line_args: I) -> Result<Self, CliError> {
        let mut iter = command_line_args.into_iter().skip(1);
        let mut config_path: Option<PathBuf> = None;
        let mut temp_hash: Option<String> = None;

        let verb = loop {
            let Some(arg) = iter.next() else {
                return Err(CliError::MissingCommand);
            };

            match arg.as_str() {
                "--config" | "-c" => {
                    let Some(path) = iter.next() else {
                        return Err(CliError::MissingFlagValue(arg));
                    };
                    config_path = Some(PathBuf::from(path));
                }
                "--temp-hash" => {
                    let Some(hash) = iter.next() else {
                        return Err(CliError::MissingFlagValue(arg));
                    };
                    temp_hash = Some(hash);
                }
                flag if flag.starts_with('-') => {
                    return Err(CliError::InvalidCommandLineFlag(arg));
                }
                _ => break arg,
            }
        };

        Ok(CliArgs {
            config_path: config_path.ok_or(CliError::MissingConfig)?,
            temp_hash,
            verb,
            args: iter.collect(),
        })
    }
}

/// Renders a reply the way redis-cli does.
pub fn format_reply(value: &RespValue) -> String {
    let mut out = String::new();
    write_reply(&mut out, value, 0);
    out
}

fn write_reply(out: &mut String, value: &RespValue, indent: usize) {
    match value {
        RespValue::Array(items) if !items.is_empty() => {
            let width = items.len().to_string().len();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent));
                }
                let label = format!("{:>width$}) ", i + 1, width = width);
                out.push_str(&label);
                write_reply(out, item, indent + label.len());
            }
        }
        RespValue::Array(_) => out.push_str("(empty array)"),
        RespValue::Ok => out.push_str("OK"),
        RespValue::SimpleString(s) => out.push_str(s),
        RespValue::Error(e) => {
            out.push_str("(error) ");
            out.push_str(e);
        }
        RespValue::Integer(n) => out.push_str(&format!("(integer) {}", n)),
        RespValue::BulkString(data) => {
            out.push_str(&format!("{:?}", String::from_utf8_lossy(data)));
        }
        RespValue::Null | RespValue::NullArray => out.push_str("(nil)"),
    }
}
