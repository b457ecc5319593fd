//! Interactive confirmation and value prompts.
//!
//! Prompts are written to stderr so stdout stays reserved for command output.
//! Commands receive a `&dyn Prompter`; tests script the answers.

use std::io::IsTerminal;

use dialoguer::{Confirm, Input, Password};

use crate::error::AzCliError;

pub trait Prompter: Send + Sync {
    /// Ask a yes/no question. An empty answer takes `default`.
    fn confirm(&self, msg: &str, default: bool) -> crate::Result<bool>;

    /// Ask for a free-form value.
    fn prompt(&self, msg: &str) -> crate::Result<String>;

    /// Ask for a secret value without echoing it.
    fn prompt_password(&self, msg: &str) -> crate::Result<String>;
}

/// Prompter backed by the terminal through `dialoguer`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompter;

impl ConsolePrompter {
    fn label(&self, msg: &str) -> crate::Result<String> {
        ensure_interactive(std::io::stdin().is_terminal(), msg)?;
        Ok(prompt_label(msg))
    }
}

impl Prompter for ConsolePrompter {
    fn confirm(&self, msg: &str, default: bool) -> crate::Result<bool> {
        Confirm::new()
            .with_prompt(self.label(msg)?)
            .default(default)
            .interact()
            .map_err(|e| prompt_failed(msg, e))
    }

    fn prompt(&self, msg: &str) -> crate::Result<String> {
        Input::<String>::new()
            .with_prompt(self.label(msg)?)
            .allow_empty(true)
            .interact_text()
            .map_err(|e| prompt_failed(msg, e))
    }

    fn prompt_password(&self, msg: &str) -> crate::Result<String> {
        Password::new()
            .with_prompt(self.label(msg)?)
            .allow_empty_password(true)
            .interact()
            .map_err(|e| prompt_failed(msg, e))
    }
}

fn ensure_interactive(is_terminal: bool, msg: &str) -> crate::Result<()> {
    if is_terminal {
        return Ok(());
    }
    Err(AzCliError::RequiredArgumentMissing(format!(
        "unable to prompt for '{}' in non-interactive mode",
        prompt_label(msg)
    )))
}

/// `dialoguer` appends its own `: ` separator.
fn prompt_label(msg: &str) -> String {
    msg.trim().trim_end_matches(':').trim_end().to_string()
}

fn prompt_failed(msg: &str, err: dialoguer::Error) -> AzCliError {
    AzCliError::Cli(format!("Failed to read '{}': {}", prompt_label(msg), err))
}

/// Confirm an operation unless `yes` was passed.
///
/// A declined prompt aborts the command with [`AzCliError::DecoratorEarlyExit`].
pub fn user_confirmation(prompter: &dyn Prompter, msg: &str, yes: bool) -> crate::Result<()> {
    if yes {
        return Ok(());
    }
    if prompter.confirm(msg, false)? {
        Ok(())
    } else {
        Err(AzCliError::DecoratorEarlyExit)
    }
}


#[cfg(test)]
mod tests {
    use super::scripted::ScriptedPrompter;
    use super::*;

    #[test]
    fn test_yes_skips_prompt() {
        let prompter = ScriptedPrompter::new(&[]);
        assert!(user_confirmation(&prompter, "continue?", true).is_ok());
        assert!(prompter.asked().is_empty());
    }

    #[test]
    fn test_declined_is_early_exit() {
        let prompter = ScriptedPrompter::new(&["n"]);
        let result = user_confirmation(&prompter, "continue?", false);
        assert!(matches!(result, Err(AzCliError::DecoratorEarlyExit)));
    }

    #[test]
    fn test_prompt_label_drops_trailing_separator() {
        assert_eq!(prompt_label("Please specify Windows password: "), "Please specify Windows password");
        assert_eq!(prompt_label("continue?"), "continue?");
    }

    #[test]
    fn test_non_interactive_prompt_is_missing_argument() {
        assert!(ensure_interactive(true, "password: ").is_ok());
        assert!(matches!(
            ensure_interactive(false, "password: "),
            Err(AzCliError::RequiredArgumentMissing(msg))
                if msg == "unable to prompt for 'password' in non-interactive mode"
        ));
    }

    #[test]
    fn test_prompt_io_failure_maps_to_cli_error() {
        let err = dialoguer::Error::IO(std::io::Error::other("closed"));
        assert!(matches!(
            prompt_failed("name: ", err),
            AzCliError::Cli(msg) if msg.starts_with("Failed to read 'name': ") && msg.ends_with("closed")
        ));
    }

    #[test]
    fn test_empty_answer_takes_default() {
        let prompter = ScriptedPrompter::new(&[""]);
        assert!(!prompter.confirm("continue?", false).unwrap());
    }
}
