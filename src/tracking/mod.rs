//! Change tracking and incremental persistence
//!
//! Project notifications flow through the [`FilterStack`], mark units in the
//! [`DirtyUnitSet`], may move inserted nodes into fresh units via the
//! [`UnitSplitter`], and are finally flushed by the [`StatePersister`] at
//! command boundaries.

pub mod command;
pub mod dirty;
pub mod filter;
pub mod persister;
pub mod splitter;

pub use command::{CommandEvent, CommandInfo};
pub use dirty::DirtyUnitSet;
pub use filter::{FilterStack, NotificationFilter};
pub use persister::{FlushReport, PersisterState, StatePersister};
pub use splitter::{Placement, UnitSplitter};
