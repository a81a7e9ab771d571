/*
┌──────────── coordinator task (actor.rs) ────────────┐
│  Command::Call(Request, oneshot) ──▶ MessageRouter   │
│                                        │             │
│                              PluginRegistry / store  │
│  Command::MenuClicked ──▶ ClickDispatcher (spawned)  │
└──────────────────────────────────────────────────────┘
          ▲ call()                       │ notify / request
          │                              ▼
┌─────────┴──────────┐        ┌─────────────────────────┐
│  ExecutorClient    │◀───────│   ExecutorDirectory     │
│  (one per page)    │ inbox  │   page id → inbox       │
└────────────────────┘        └─────────────────────────┘
*/
use feature_plugin::message::PageId;
use serde::{Deserialize, Serialize};

pub mod actor;
pub mod directory;
pub mod router;

pub use actor::{CoordinatorHandle, spawn_coordinator};
pub use directory::{BroadcastReport, ExecutorDirectory, ExecutorHandle};
pub use router::MessageRouter;

/// Which page an executor lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageInfo {
    pub id: PageId,
    pub url: String,
}

impl PageInfo {
    pub fn new(id: PageId, url: impl Into<String>) -> Self {
        Self { id, url: url.into() }
    }
}
