//! Actor layer for the talk controller.
//!
//! ```text
//! MatchCoordinator (singleton)
//! ├── owns UserDirectory, BlockList, PointsLedger, SessionManager
//! └── SessionTimers (one sleeping task per open session)
//!         └── posts TimerFired back to the coordinator mailbox
//! ```
//!
//! # Modules
//!
//! - [`coordinator`] - `MatchCoordinator` and its cloneable handle
//! - [`messages`] - Mailbox message types
//! - [`metrics`] - Mailbox monitoring and timer counters
//! - [`timers`] - Cancellable, versioned session timeouts

pub mod coordinator;
pub mod messages;
pub mod metrics;
pub mod timers;

pub use coordinator::{MatchCoordinator, MatchCoordinatorHandle};
pub use messages::{CoordinatorMessage, CoordinatorStatus};
pub use metrics::{ActorMetrics, MailboxLevel, MailboxMonitor};
pub use timers::SessionTimers;
