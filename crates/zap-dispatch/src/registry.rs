use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::command::{CommandHandler, CommandSpec};

#[derive(Clone)]
pub struct RegisteredCommand {
    pub spec: CommandSpec,
    pub handler: Arc<dyn CommandHandler>,
}

/// Lookup table from command name or alias to its handler.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, RegisteredCommand>,
    aliases: HashMap<String, String>,
}

fn normalize_token(token: &str) -> String {
    token.trim().to_lowercase()
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: CommandSpec, handler: Arc<dyn CommandHandler>) -> Result<()> {
        let name = normalize_token(&spec.name);
        if name.is_empty() || name.contains(char::is_whitespace) {
            bail!("command name '{}' is invalid", spec.name);
        }
        if self.resolve(&name).is_some() {
            bail!("command '{name}' is already registered");
        }
        let aliases = spec
            .aliases
            .iter()
            .map(|alias| normalize_token(alias))
            .filter(|alias| !alias.is_empty() && *alias != name)
            .collect::<Vec<_>>();
        for alias in &aliases {
            if self.resolve(alias).is_some() {
                bail!("alias '{alias}' of command '{name}' is already registered");
            }
        }
        for alias in aliases {
            self.aliases.insert(alias, name.clone());
        }
        self.commands.insert(
            name.clone(),
            RegisteredCommand {
                spec: CommandSpec { name, ..spec },
                handler,
            },
        );
        Ok(())
    }

    pub fn resolve(&self, token: &str) -> Option<&RegisteredCommand> {
        let token = normalize_token(token);
        let name = self.aliases.get(&token).unwrap_or(&token);
        self.commands.get(name)
    }

    /// Registered specs sorted by name.
    pub fn specs(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values().map(|command| &command.spec)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;

    use super::CommandRegistry;
    use crate::command::{CommandHandler, CommandInvocation, CommandOutcome, CommandSpec};

    struct Noop;

    #[async_trait]
    impl CommandHandler for Noop {
        async fn handle(&self, _invocation: CommandInvocation) -> Result<CommandOutcome> {
            Ok(CommandOutcome::success(""))
        }
    }

    #[test]
    fn unit_resolve_matches_name_and_alias_case_insensitively() {
        let mut registry = CommandRegistry::new();
        registry
            .register(
                CommandSpec::new("Sticker", "Make a sticker").with_aliases(["s", "fig"]),
                Arc::new(Noop),
            )
            .expect("register");
        assert_eq!(
            registry.resolve("STICKER").map(|command| command.spec.name.as_str()),
            Some("sticker")
        );
        assert!(registry.resolve("FIG").is_some());
        assert!(registry.resolve("unknown").is_none());
    }

    #[test]
    fn regression_register_rejects_duplicate_names_and_aliases() {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandSpec::new("ban", "Ban").with_aliases(["b"]), Arc::new(Noop))
            .expect("register");
        assert!(registry
            .register(CommandSpec::new("BAN", "Again"), Arc::new(Noop))
            .is_err());
        assert!(registry
            .register(CommandSpec::new("block", "Block").with_aliases(["b"]), Arc::new(Noop))
            .is_err());
        assert!(registry
            .register(CommandSpec::new(" ", "Blank"), Arc::new(Noop))
            .is_err());
        assert_eq!(registry.len(), 1);
    }
}
