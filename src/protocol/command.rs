use std::fmt;

/// Command kinds understood by the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// addItem('key', 'value')
    AddItem,
    /// deleteItem('key')
    DeleteItem,
    /// getItem('key')
    GetItem,
    /// getAllItems()
    GetAllItems,
}

impl CommandKind {
    /// Verb as it appears in command text
    pub fn verb(self) -> &'static str {
        match self {
            CommandKind::AddItem => "addItem",
            CommandKind::DeleteItem => "deleteItem",
            CommandKind::GetItem => "getItem",
            CommandKind::GetAllItems => "getAllItems",
        }
    }

    /// Look up a kind by its verb (case-sensitive)
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "addItem" => Some(CommandKind::AddItem),
            "deleteItem" => Some(CommandKind::DeleteItem),
            "getItem" => Some(CommandKind::GetItem),
            "getAllItems" => Some(CommandKind::GetAllItems),
            _ => None,
        }
    }

    /// Number of quoted arguments the verb takes
    pub fn arity(self) -> usize {
        match self {
            CommandKind::AddItem => 2,
            CommandKind::DeleteItem | CommandKind::GetItem => 1,
            CommandKind::GetAllItems => 0,
        }
    }
}

/// A parsed command.
///
/// `value` is only meaningful for `AddItem`, and `key` is empty for
/// `GetAllItems`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub key: String,
    pub value: String,
}

impl Command {
    pub fn add_item(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::AddItem,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete_item(key: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::DeleteItem,
            key: key.into(),
            value: String::new(),
        }
    }

    pub fn get_item(key: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::GetItem,
            key: key.into(),
            value: String::new(),
        }
    }

    pub fn get_all_items() -> Self {
        Self {
            kind: CommandKind::GetAllItems,
            key: String::new(),
            value: String::new(),
        }
    }

    /// Key used to pick the owning worker
    pub fn shard_key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CommandKind::AddItem => write!(f, "addItem('{}', '{}')", self.key, self.value),
            CommandKind::DeleteItem | CommandKind::GetItem => {
                write!(f, "{}('{}')", self.kind.verb(), self.key)
            }
            CommandKind::GetAllItems => write!(f, "getAllItems()"),
        }
    }
}
