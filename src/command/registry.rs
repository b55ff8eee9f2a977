//! Command registry for the FT.* family
//!
//! Each command carries dispatch attributes: whether it writes (and so
//! runs as a global transaction) or reads through a single hop, plus its
//! arity contract.

use std::collections::HashMap;

use crate::command::{family, CommandContext};
use crate::datastore::Datastore;
use crate::error::{Result, SearchError};
use crate::reply::Reply;

pub mod flags {
    /// Mutates index state; dispatched as a global transaction
    pub const WRITE: u32 = 1 << 0;
    pub const GLOBAL_TRANS: u32 = 1 << 1;
    /// Reads through a single hop spanning all shards
    pub const READONLY: u32 = 1 << 2;
}

pub type CommandHandler = fn(&Datastore, &CommandContext, &[Vec<u8>]) -> Result<Reply>;

pub struct CommandSpec {
    pub name: &'static str,
    pub flags: u32,
    /// Minimum argument count after the command name
    pub min_args: usize,
    /// Exact arity instead of at-least
    pub exact: bool,
    pub handler: CommandHandler,
}

pub struct CommandRegistry {
    commands: HashMap<String, CommandSpec>,
}

impl CommandRegistry {
    /// The FT.* family with the attributes of the original surface.
    pub fn search_family() -> Self {
        use flags::*;
        let mut registry = Self {
            commands: HashMap::new(),
        };
        let specs = [
            CommandSpec { name: "FT.CREATE", flags: WRITE | GLOBAL_TRANS, min_args: 1, exact: false, handler: family::ft_create },
            CommandSpec { name: "FT.ALTER", flags: WRITE | GLOBAL_TRANS, min_args: 2, exact: false, handler: family::ft_alter },
            CommandSpec { name: "FT.DROPINDEX", flags: WRITE | GLOBAL_TRANS, min_args: 1, exact: false, handler: family::ft_dropindex },
            CommandSpec { name: "FT.INFO", flags: READONLY, min_args: 1, exact: true, handler: family::ft_info },
            CommandSpec { name: "FT._LIST", flags: READONLY, min_args: 0, exact: true, handler: family::ft_list },
            CommandSpec { name: "FT.SEARCH", flags: READONLY, min_args: 2, exact: false, handler: family::ft_search },
            CommandSpec { name: "FT.AGGREGATE", flags: READONLY, min_args: 2, exact: false, handler: family::ft_aggregate },
            CommandSpec { name: "FT.PROFILE", flags: READONLY, min_args: 3, exact: false, handler: family::ft_profile },
            CommandSpec { name: "FT.TAGVALS", flags: READONLY, min_args: 2, exact: true, handler: family::ft_tagvals },
            CommandSpec { name: "FT.SYNDUMP", flags: READONLY, min_args: 1, exact: true, handler: family::ft_syndump },
            CommandSpec { name: "FT.SYNUPDATE", flags: WRITE | GLOBAL_TRANS, min_args: 3, exact: false, handler: family::ft_synupdate },
        ];
        for spec in specs {
            registry.commands.insert(spec.name.to_string(), spec);
        }
        registry
    }

    pub fn find(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(&name.to_ascii_uppercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn dispatch(
        &self,
        datastore: &Datastore,
        ctx: &CommandContext,
        name: &str,
        args: &[Vec<u8>],
    ) -> Result<Reply> {
        let Some(spec) = self.find(name) else {
            return Err(SearchError::UnknownCommand(name.to_string()));
        };
        let bad_arity = if spec.exact {
            args.len() != spec.min_args
        } else {
            args.len() < spec.min_args
        };
        if bad_arity {
            return Err(SearchError::WrongArity(spec.name.to_lowercase()));
        }
        (spec.handler)(datastore, ctx, args)
    }
}
