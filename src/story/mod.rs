//! Station visit tracking and episode selection.
//!
//! Everything in this module is pure: no network, no disk. The effect shell in
//! `app::story_session` feeds it catalog data and persists what it returns.

mod catalog;
mod error;
mod ledger;
mod markers;
mod selection;

use std::fmt;

use serde::{Deserialize, Serialize};

pub(crate) use catalog::*;
pub(crate) use error::*;
pub(crate) use ledger::*;
pub(crate) use markers::*;
pub(crate) use selection::*;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub(crate) struct $name(String);

        impl $name {
            pub(crate) fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub(crate) fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

string_id!(StationId);
string_id!(EpisodeId);
string_id!(LineId);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Account {
    pub(crate) id: u64,
    pub(crate) username: String,
    pub(crate) email: String,
}

/// Whose visit ledger is being read or written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum Actor {
    #[default]
    Anonymous,
    Account(Account),
}

impl Actor {
    pub(crate) fn is_authenticated(&self) -> bool {
        matches!(self, Self::Account(_))
    }

    pub(crate) fn label(&self) -> String {
        match self {
            Self::Anonymous => "guest".to_string(),
            Self::Account(account) => account.username.clone(),
        }
    }
}
