//! Operator input routing.
//!
//! `/verb args` is tried, in order, as a built-in, as a connection
//! command of the same name (verbs without `_` only), then as a plugin
//! command. Lines without a leading `/` go to `say`.

use twirc_sdk::ClientError;

use crate::app::App;
use crate::plugin::isolate;
use crate::terminal::Line;

impl App {
    /// Handle one line from the terminal.
    pub async fn input_line(&self, line: &Line) {
        let Ok(text) = std::str::from_utf8(line.bytes()) else {
            line.hide();
            self.host()
                .output()
                .println(format!("Could not decode {:?}", String::from_utf8_lossy(line.bytes())));
            return;
        };
        let text = text.trim_end_matches(['\r', '\n']);

        match text.strip_prefix('/') {
            Some(command) => {
                let (verb, args) = command.split_once(' ').unwrap_or((command, ""));
                self.input_command(&verb.to_lowercase(), args, line).await;
            }
            None => self.input_command("say", text, line).await,
        }
        line.show();
    }

    /// Run `verb` with `args`. Anything printed goes to the operator.
    pub async fn input_command(&self, verb: &str, args: &str, line: &Line) {
        if self.builtin(verb, args, line).await {
            return;
        }

        if !verb.contains('_')
            && let Some(connection) = self.host().connection()
            && let Some(result) = connection.call(verb, args).await
        {
            line.show();
            if let Err(e) = result {
                self.host().output().println(e.to_string());
            }
            return;
        }

        let Some(plugin) = self.plugins().find_command(verb) else {
            line.show();
            self.host()
                .output()
                .println(format!("Invalid command {verb:?}"));
            return;
        };
        let output = self.host().output();
        match isolate(plugin.command(verb, self.host(), args, line)).await {
            Ok(Some(text)) => output.println(text),
            Ok(None) => {}
            Err(message) => {
                tracing::error!(plugin = plugin.name(), command = verb, error = %message, "command failed");
                line.show();
                output.println(format!("/{verb} failed: {message}"));
            }
        }
    }

    /// False when `verb` is not a built-in.
    async fn builtin(&self, verb: &str, args: &str, line: &Line) -> bool {
        let output = self.host().output();
        match verb {
            "load" | "unload" | "reload" => {
                line.show();
                let names: Vec<&str> = args.split_whitespace().collect();
                if names.is_empty() {
                    output.println(format!("Usage: /{verb} <plugin>..."));
                }
                for name in names {
                    self.plugin_command(verb, name).await;
                }
            }
            "quit" => {
                line.show();
                self.quit(args).await;
            }
            "quot" => {
                line.show();
                if args.trim().is_empty() {
                    output.println("Usage: /quot <raw line>");
                    return true;
                }
                let result = match self.host().connection() {
                    Some(connection) => connection.send_raw(args).await,
                    None => Err(ClientError::NotConnected),
                };
                if let Err(e) = result {
                    output.println(e.to_string());
                }
            }
            _ => return false,
        }
        true
    }

    async fn plugin_command(&self, verb: &str, name: &str) {
        let output = self.host().output();
        let plugins = self.plugins();
        let message = match verb {
            "load" => match plugins.load(name).await {
                Ok(()) => format!("Loaded {name}"),
                Err(e) => e.to_string(),
            },
            "reload" => match plugins.reload(name).await {
                Ok(()) => format!("Reloaded {name}"),
                Err(e) => e.to_string(),
            },
            _ => match plugins.unload(name).await {
                None => format!("{name} is not loaded"),
                Some(Ok(())) => format!("Unloaded {name}"),
                Some(Err(e)) => format!("Unloaded {name} (unload hook failed: {e})"),
            },
        };
        output.println(message);
    }
}
