//! # Talk Test Utilities
//!
//! Shared test utilities for the talk controller.
//!
//! This crate provides:
//! - Fixtures (`TestStudent`, `TestTeacher`, `test_policy`)
//! - Service harness (`TestTalkService`) wrapping a live coordinator and the
//!   real router
//!
//! ## Usage
//!
//! ```rust,ignore
//! use talk_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() -> anyhow::Result<()> {
//!     let service = TestTalkService::spawn();
//!     let teacher = service.online(TestTeacher::new("Ana").teaches("en")).await?;
//!     let student = service.online(TestStudent::new("Ken").learning("en")).await?;
//!
//!     let session = service.handle().find_match(student).await?;
//!     assert_eq!(session.teacher_id, teacher);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod service_harness;

pub use fixtures::*;
pub use service_harness::*;
