//! `Matchmaker` - student eligibility and teacher selection.
//!
//! Selection is a pure function over a [`DirectorySnapshot`]: the candidate
//! list is the snapshot's available teachers for the student's target
//! language, minus blocked pairs. Among the rest the teacher idle the longest
//! wins (never-completed sorts first), ties broken by lowest user ID.
//!
//! Committing a match (availability, debit, session creation) happens in
//! [`crate::engine::TalkEngine::find_match`] so it runs as one unit inside
//! the coordinator.

use crate::blocklist::BlockList;
use crate::directory::{Availability, DirectorySnapshot, Profile, UserDirectory};
use crate::errors::TalkError;
use crate::ledger::PointsLedger;

use common::types::{LanguageCode, UserId};

/// Check that `student_id` may request a match and return its target language.
///
/// Checks run in a fixed order: existence, role, availability, points.
///
/// # Errors
///
/// `NotFound`, `InvalidRole`, `NotAvailable` or `InsufficientPoints`.
pub fn eligible_student(
    directory: &UserDirectory,
    ledger: &PointsLedger,
    student_id: &UserId,
    cost: u64,
) -> Result<LanguageCode, TalkError> {
    let student = directory.require(student_id)?;

    let Profile::Student { target_language } = &student.profile else {
        return Err(TalkError::InvalidRole(
            "only students can request a match".to_string(),
        ));
    };

    if student.availability != Availability::Available {
        return Err(TalkError::NotAvailable);
    }

    let balance = ledger.balance(student_id);
    if balance < cost {
        return Err(TalkError::InsufficientPoints {
            balance,
            required: cost,
        });
    }

    Ok(target_language.clone())
}

/// Pick a teacher for `student_id` from `snapshot`, or `None` if no
/// compatible unblocked teacher is available.
#[must_use]
pub fn select_teacher(
    snapshot: &DirectorySnapshot,
    language: &LanguageCode,
    student_id: UserId,
    blocks: &BlockList,
) -> Option<UserId> {
    snapshot
        .available_teachers(language)
        .filter(|teacher| teacher.id != student_id)
        .filter(|teacher| !blocks.is_blocked(student_id, teacher.id))
        // Option orders None before Some, so never-completed teachers come first
        .min_by_key(|teacher| (teacher.last_completed, teacher.id))
        .map(|teacher| teacher.id)
}

/// Metric label for a match result.
#[must_use]
pub fn outcome_label<T>(result: &Result<T, TalkError>) -> &'static str {
    match result {
        Ok(_) => "matched",
        Err(TalkError::NoTeacherAvailable) => "no_teacher",
        Err(TalkError::InsufficientPoints { .. }) => "insufficient_points",
        Err(TalkError::NotAvailable) => "not_available",
        Err(TalkError::NotFound(_) | TalkError::InvalidRole(_)) => "rejected",
        Err(TalkError::Draining) => "draining",
        Err(_) => "error",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::directory::NewUser;
    use crate::ledger::LedgerReason;
    use chrono::Utc;
    use common::types::Role;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tokio::time::Instant;
    use uuid::Uuid;

    fn lang(code: &str) -> LanguageCode {
        LanguageCode::parse(code).unwrap()
    }

    fn supported() -> BTreeSet<LanguageCode> {
        ["ja", "en", "es", "fr"].into_iter().map(lang).collect()
    }

    fn add(dir: &mut UserDirectory, id: u128, role: Role, langs: &[&str]) -> UserId {
        let new_user = NewUser {
            id: Some(UserId(Uuid::from_u128(id))),
            display_name: format!("user-{id}"),
            role,
            languages: langs.iter().map(|l| lang(l)).collect(),
        };
        let id = dir.register(&new_user, &supported(), Utc::now()).unwrap().id;
        dir.set_available(&id).unwrap();
        id
    }

    #[test]
    fn test_eligible_student_check_order() {
        let mut dir = UserDirectory::new();
        let mut ledger = PointsLedger::new();
        let teacher = add(&mut dir, 1, Role::Teacher, &["en"]);
        let student = add(&mut dir, 2, Role::Student, &["en"]);

        assert!(matches!(
            eligible_student(&dir, &ledger, &UserId::new(), 1),
            Err(TalkError::NotFound(_))
        ));
        assert!(matches!(
            eligible_student(&dir, &ledger, &teacher, 1),
            Err(TalkError::InvalidRole(_))
        ));
        assert_eq!(
            eligible_student(&dir, &ledger, &student, 1),
            Err(TalkError::InsufficientPoints {
                balance: 0,
                required: 1
            })
        );

        ledger.credit(student, 1, LedgerReason::InitialGrant, Utc::now());
        assert_eq!(eligible_student(&dir, &ledger, &student, 1), Ok(lang("en")));

        dir.set_offline(&student).unwrap();
        assert_eq!(
            eligible_student(&dir, &ledger, &student, 1),
            Err(TalkError::NotAvailable)
        );
    }

    #[test]
    fn test_select_teacher_filters_language() {
        let mut dir = UserDirectory::new();
        add(&mut dir, 1, Role::Teacher, &["ja"]);
        let en_teacher = add(&mut dir, 2, Role::Teacher, &["en", "fr"]);
        let student = add(&mut dir, 3, Role::Student, &["en"]);

        let snapshot = dir.snapshot();
        assert_eq!(
            select_teacher(&snapshot, &lang("en"), student, &BlockList::new()),
            Some(en_teacher)
        );
        assert_eq!(
            select_teacher(&snapshot, &lang("es"), student, &BlockList::new()),
            None
        );
    }

    #[test]
    fn test_select_teacher_skips_blocked() {
        let mut dir = UserDirectory::new();
        let teacher = add(&mut dir, 1, Role::Teacher, &["en"]);
        let student = add(&mut dir, 2, Role::Student, &["en"]);

        let mut blocks = BlockList::new();
        blocks.block(student, teacher, Utc::now());

        let snapshot = dir.snapshot();
        assert_eq!(select_teacher(&snapshot, &lang("en"), student, &blocks), None);
    }

    #[test]
    fn test_select_teacher_prefers_longest_idle() {
        let mut dir = UserDirectory::new();
        let busy = add(&mut dir, 1, Role::Teacher, &["en"]);
        let idle = add(&mut dir, 2, Role::Teacher, &["en"]);
        let student = add(&mut dir, 3, Role::Student, &["en"]);

        let now = Instant::now();
        dir.record_completion(&idle, now, Utc::now());
        dir.record_completion(&busy, now + Duration::from_secs(60), Utc::now());

        let snapshot = dir.snapshot();
        assert_eq!(
            select_teacher(&snapshot, &lang("en"), student, &BlockList::new()),
            Some(idle)
        );
    }

    #[test]
    fn test_select_teacher_never_completed_sorts_first() {
        let mut dir = UserDirectory::new();
        let veteran = add(&mut dir, 1, Role::Teacher, &["en"]);
        let newcomer = add(&mut dir, 2, Role::Teacher, &["en"]);
        let student = add(&mut dir, 3, Role::Student, &["en"]);

        dir.record_completion(&veteran, Instant::now(), Utc::now());

        let snapshot = dir.snapshot();
        assert_eq!(
            select_teacher(&snapshot, &lang("en"), student, &BlockList::new()),
            Some(newcomer)
        );
    }

    #[test]
    fn test_select_teacher_ties_broken_by_lowest_id() {
        let mut dir = UserDirectory::new();
        // Registered in descending ID order so insertion order disagrees with ID order
        let high = add(&mut dir, 9, Role::Teacher, &["en"]);
        let low = add(&mut dir, 4, Role::Teacher, &["en"]);
        let student = add(&mut dir, 1, Role::Student, &["en"]);

        let snapshot = dir.snapshot();
        let chosen = select_teacher(&snapshot, &lang("en"), student, &BlockList::new());
        assert_eq!(chosen, Some(low));
        assert_ne!(chosen, Some(high));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label::<()>(&Ok(())), "matched");
        assert_eq!(
            outcome_label::<()>(&Err(TalkError::NoTeacherAvailable)),
            "no_teacher"
        );
        assert_eq!(
            outcome_label::<()>(&Err(TalkError::Internal("x".to_string()))),
            "error"
        );
    }
}
