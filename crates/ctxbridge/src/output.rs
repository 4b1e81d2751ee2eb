use std::io::{IsTerminal, Write};
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct CallOutput<'a> {
    name: &'a str,
    result: &'a Value,
    elapsed_ms: u128,
}

#[derive(Serialize)]
struct ConnectionOutput<'a> {
    connection: &'a str,
    event: &'a str,
    remote_instance: Option<&'a str>,
}

/// Print the value a call resolved with.
pub fn print_result(name: &str, value: &Value, elapsed: Duration, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = CallOutput {
                name,
                result: value,
                elapsed_ms: elapsed.as_millis(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["NAME", "ELAPSED", "RESULT"])
                .add_row(vec![
                    name.to_string(),
                    format!("{}ms", elapsed.as_millis()),
                    value.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            );
        }
        OutputFormat::Raw => print_raw(&raw_text(value)),
    }
}

/// Print a connection lifecycle event from `serve`.
pub fn print_connection(
    connection: &str,
    event: &str,
    remote_instance: Option<&str>,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = ConnectionOutput {
                connection,
                event,
                remote_instance,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CONNECTION", "EVENT", "REMOTE"])
                .add_row(vec![
                    connection,
                    event,
                    remote_instance.unwrap_or("-"),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "connection={connection} event={event} remote={}",
                remote_instance.unwrap_or("-")
            );
        }
        OutputFormat::Raw => print_raw(&format!("{connection} {event}\n")),
    }
}

fn print_raw(text: &str) {
    let mut out = std::io::stdout();
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

/// Strings print bare; everything else as compact JSON.
fn raw_text(value: &Value) -> String {
    match value {
        Value::String(text) => format!("{text}\n"),
        other => format!("{other}\n"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn raw_text_unquotes_strings_only() {
        assert_eq!(raw_text(&json!("pong")), "pong\n");
        assert_eq!(raw_text(&json!({"a": [1, 2]})), "{\"a\":[1,2]}\n");
        assert_eq!(raw_text(&Value::Null), "null\n");
    }

    #[test]
    fn call_output_serializes_result_inline() {
        let value = json!(5);
        let out = CallOutput {
            name: "Math.add",
            result: &value,
            elapsed_ms: 3,
        };
        assert_eq!(
            serde_json::to_string(&out).unwrap(),
            r#"{"name":"Math.add","result":5,"elapsed_ms":3}"#
        );
    }
}
