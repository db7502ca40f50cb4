//! Line-oriented command dispatch.
//!
//! One text line in, one text response out; no envelope. Commands are
//! resolved by name from the runtime's command registry. A command failure
//! is rendered as text; the telnet surface never raises protocol faults.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::extension::ExtensionRegistry;
use crate::url::Url;

pub const PROMPT_KEY: &str = "prompt";
pub const DEFAULT_PROMPT: &str = "larch>";
const NO_PROMPT_FLAG: &str = "--no-prompt";

#[async_trait]
pub trait TelnetCommand: Send + Sync {
    /// `args` is the rest of the line after the command token. `Ok(None)`
    /// suppresses the entire response, prompt included.
    async fn execute(&self, url: &Url, args: &str) -> anyhow::Result<Option<String>>;
}

pub struct TelnetDispatcher {
    commands: Arc<ExtensionRegistry<dyn TelnetCommand>>,
}

impl TelnetDispatcher {
    pub fn new(commands: Arc<ExtensionRegistry<dyn TelnetCommand>>) -> Self {
        Self { commands }
    }

    /// Handle one inbound line. `None` means no bytes go back at all.
    pub async fn dispatch(&self, url: &Url, line: &str) -> Option<String> {
        // The prompt is carried percent-encoded on the channel url.
        let prompt = url
            .parameter_decoded(PROMPT_KEY)
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string());
        let no_prompt = line.contains(NO_PROMPT_FLAG);
        let line = line.replace(NO_PROMPT_FLAG, "");

        let message = line.trim();
        let (command, args) = match message.split_once(' ') {
            Some((command, args)) => (command.trim(), args.trim()),
            None => (message, ""),
        };

        let mut buf = String::new();
        if !command.is_empty() {
            if self.commands.contains(command) {
                match self.commands.get(command) {
                    Ok(handler) => match handler.execute(url, args).await {
                        // No output at all overrides even the prompt.
                        Ok(None) => return None,
                        Ok(Some(text)) => buf.push_str(&text),
                        Err(err) => {
                            debug!(command, error = %err, "telnet command failed");
                            buf.push_str(&err.to_string());
                        }
                    },
                    Err(err) => buf.push_str(&err.to_string()),
                }
            } else {
                buf.push_str("Unsupported command: ");
                buf.push_str(command);
            }
        }

        if !buf.is_empty() {
            buf.push_str("\r\n");
        }
        if !prompt.is_empty() && !no_prompt {
            buf.push_str(&prompt);
        }
        Some(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Help;

    #[async_trait]
    impl TelnetCommand for Help {
        async fn execute(&self, _url: &Url, args: &str) -> anyhow::Result<Option<String>> {
            match args {
                "quiet" => Ok(None),
                "broken" => anyhow::bail!("help subsystem offline"),
                _ => Ok(Some("available commands: help".to_string())),
            }
        }
    }

    fn dispatcher() -> TelnetDispatcher {
        let commands: Arc<ExtensionRegistry<dyn TelnetCommand>> =
            Arc::new(ExtensionRegistry::new("telnet-command"));
        commands.register("help", || Arc::new(Help));
        TelnetDispatcher::new(commands)
    }

    fn url() -> Url {
        Url::new("larch", "127.0.0.1", 20880)
    }

    #[tokio::test]
    async fn no_prompt_flag_suppresses_prompt() {
        let response = dispatcher().dispatch(&url(), "help --no-prompt").await.unwrap();
        assert_eq!(response, "available commands: help\r\n");
    }

    #[tokio::test]
    async fn unsupported_command_names_the_command() {
        let response = dispatcher().dispatch(&url(), "frobnicate").await.unwrap();
        assert_eq!(response, format!("Unsupported command: frobnicate\r\n{DEFAULT_PROMPT}"));
    }

    #[tokio::test]
    async fn empty_line_yields_just_the_prompt() {
        let response = dispatcher().dispatch(&url(), "   ").await.unwrap();
        assert_eq!(response, DEFAULT_PROMPT);
    }

    #[tokio::test]
    async fn command_failure_is_rendered_as_text() {
        let response = dispatcher().dispatch(&url(), "help broken").await.unwrap();
        assert_eq!(
            response,
            format!("help subsystem offline\r\n{DEFAULT_PROMPT}")
        );
    }

    #[tokio::test]
    async fn silent_command_suppresses_everything() {
        assert!(dispatcher().dispatch(&url(), "help quiet").await.is_none());
    }

    #[tokio::test]
    async fn prompt_is_read_percent_decoded() {
        let url = url().with_parameter_encoded(PROMPT_KEY, "larch> ");
        let response = dispatcher().dispatch(&url, "frobnicate").await.unwrap();
        assert!(response.ends_with("larch> "));
    }
}
