//! Command Registry
//!
//! Maps a case-insensitive command name to its descriptor: the executor,
//! the `prepare` hook that names the keys the executor will touch (so locks
//! can be taken before execution), the `undo` hook that emits reverse
//! commands for transaction rollback, and the arity.
//!
//! The table is built once before the accept loop and handed around as an
//! immutable `Arc`; nothing registers into it while commands execute.

use crate::engine::db::Db;
use crate::protocol::{CmdLine, RespValue};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Runs a command against a database. `args` excludes the command name.
pub type ExecFn = fn(&Db, &[Bytes]) -> RespValue;

/// Returns the (write keys, read keys) a command will touch.
pub type PrepareFn = fn(&[Bytes]) -> (Vec<Bytes>, Vec<Bytes>);

/// Emits the command lines that restore the pre-command state; computed
/// against current state before the command executes, applied in reverse
/// order with locks still held if the transaction aborts.
pub type UndoFn = fn(&Db, &[Bytes]) -> Vec<CmdLine>;

/// One registered command.
pub struct Command {
    pub name: &'static str,
    pub executor: ExecFn,
    /// Absent for commands that may not run inside MULTI.
    pub prepare: Option<PrepareFn>,
    /// Absent for commands whose writes cannot be rolled back.
    pub undo: Option<UndoFn>,
    /// Token count including the command name; negative means "at least".
    pub arity: i32,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("preparable", &self.prepare.is_some())
            .field("undoable", &self.undo.is_some())
            .finish()
    }
}

/// `prepare` sentinel for side-effect-free commands that touch no keys.
pub fn no_prepare(_args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), Vec::new())
}

/// Checks a command line's token count against a registered arity.
pub fn validate_arity(arity: i32, token_count: usize) -> bool {
    if arity >= 0 {
        token_count == arity as usize
    } else {
        token_count >= (-arity) as usize
    }
}

/// The frozen name -> command table.
#[derive(Debug, Default)]
pub struct CommandTable {
    commands: HashMap<&'static str, Command>,
}

impl CommandTable {
    /// Builds the table with every command this server ships.
    pub fn standard() -> Arc<Self> {
        let mut table = CommandTable::default();
        crate::commands::register_all(&mut table);
        Arc::new(table)
    }

    /// Registers one command. Names must be lowercase and unique; this runs
    /// only during construction.
    pub fn register(
        &mut self,
        name: &'static str,
        executor: ExecFn,
        prepare: Option<PrepareFn>,
        undo: Option<UndoFn>,
        arity: i32,
    ) {
        debug_assert!(name.chars().all(|c| !c.is_ascii_uppercase()));
        let previous = self.commands.insert(
            name,
            Command {
                name,
                executor,
                prepare,
                undo,
                arity,
            },
        );
        debug_assert!(previous.is_none(), "duplicate command {name}");
    }

    /// Looks up by lowercase name.
    pub fn lookup(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Lowercases the leading token of a command line for table lookup.
pub fn command_name(cmd_line: &[Bytes]) -> String {
    String::from_utf8_lossy(&cmd_line[0]).to_ascii_lowercase()
}
