//! The chat schema's tables and message status columns.
//!
//! The DDL itself lives in the embedded payloads in [`crate::sql`]; this
//! module names the objects the program needs to loop over or inspect.

use std::fmt;

/// One of the four chat tables, all in the `public` schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// One row per Supabase auth user.
    Profiles,
    Conversations,
    /// Join of conversations and profiles, unique per pair.
    ConversationParticipants,
    Messages,
}

impl Table {
    /// All tables, parents before children.
    pub const ALL: [Table; 4] = [
        Table::Profiles,
        Table::Conversations,
        Table::ConversationParticipants,
        Table::Messages,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Conversations => "conversations",
            Table::ConversationParticipants => "conversation_participants",
            Table::Messages => "messages",
        }
    }

    /// Name of the RLS policy installed on this table.
    pub fn policy_name(self) -> String {
        format!("{}_policy", self.name())
    }

    pub fn from_name(name: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A message status column added by the additive migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusColumn {
    pub name: &'static str,
    pub sql_type: &'static str,
}

/// The six status columns on `messages`, flag then timestamp.
pub const STATUS_COLUMNS: [StatusColumn; 6] = [
    StatusColumn {
        name: "is_received",
        sql_type: "BOOLEAN DEFAULT FALSE",
    },
    StatusColumn {
        name: "received_at",
        sql_type: "TIMESTAMP WITH TIME ZONE",
    },
    StatusColumn {
        name: "is_delivered",
        sql_type: "BOOLEAN DEFAULT FALSE",
    },
    StatusColumn {
        name: "delivered_at",
        sql_type: "TIMESTAMP WITH TIME ZONE",
    },
    StatusColumn {
        name: "is_read",
        sql_type: "BOOLEAN DEFAULT FALSE",
    },
    StatusColumn {
        name: "read_at",
        sql_type: "TIMESTAMP WITH TIME ZONE",
    },
];

/// Status flags whose updates fire the conversation trigger.
pub const STATUS_FLAGS: [&str; 3] = ["is_received", "is_delivered", "is_read"];

pub const TRIGGER_FUNCTION: &str = "update_conversation_on_message_status_change";
pub const TRIGGER_NAME: &str = "message_status_update_conversation";
