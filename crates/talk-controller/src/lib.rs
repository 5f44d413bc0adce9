//! 5min Talk controller library.
//!
//! Server-authoritative core of the language exchange:
//!
//! - User directory with availability (offline, available, in session)
//! - Student/teacher block list
//! - Points ledger (balance is the fold of entries)
//! - Single-shot matchmaking with teacher fairness
//! - Timed session state machine (join window, fixed talk duration)
//!
//! # Architecture
//!
//! ```text
//! HTTP (axum) ──► MatchCoordinatorHandle ──mpsc──► MatchCoordinator
//!                        ▲                              │ owns TalkEngine
//!                        │ watch (DirectorySnapshot)    │ schedules SessionTimers
//!                        └──────────────────────────────┤
//!                           broadcast (SessionEvent) ◄──┘
//! ```
//!
//! `TalkEngine` is synchronous and takes the current time as an argument;
//! the coordinator supplies the clock and performs the timer and event
//! effects the engine queues.
//!
//! # Modules
//!
//! - [`actors`] - Coordinator actor, timers, mailbox monitoring
//! - [`engine`] - Matching and session rules over the domain stores
//! - [`directory`], [`blocklist`], [`ledger`], [`session`] - Domain stores
//! - [`matchmaker`] - Eligibility and teacher selection
//! - [`http`] - JSON API
//! - [`observability`] - Metrics and health probes

pub mod actors;
pub mod blocklist;
pub mod config;
pub mod directory;
pub mod engine;
pub mod errors;
pub mod http;
pub mod ledger;
pub mod matchmaker;
pub mod observability;
pub mod session;
