//! `UserDirectory` - registry of participants and their availability.
//!
//! The directory is owned by the coordinator actor and only mutated from its
//! message loop. Readers outside the actor see an immutable
//! [`DirectorySnapshot`] that is rebuilt lazily after mutations and shared via
//! `Arc` (copy-on-read).
//!
//! # Availability transitions
//!
//! ```text
//! offline ──set_available──▶ available ──set_in_session──▶ in_session
//!    ▲                           ▲                            │
//!    └───────set_offline─────────┴──────────release───────────┘
//! ```
//!
//! Users are never removed; retiring a user means leaving them `offline`.

use crate::errors::TalkError;

use chrono::{DateTime, Utc};
use common::types::{LanguageCode, Role, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Maximum display name length (characters).
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Availability state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Offline,
    Available,
    InSession,
}

impl Availability {
    /// Returns the state as a string for errors and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Availability::Offline => "offline",
            Availability::Available => "available",
            Availability::InSession => "in_session",
        }
    }
}

/// Role-specific language declaration. Immutable after registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Profile {
    /// A student practices exactly one target language.
    Student { target_language: LanguageCode },
    /// A teacher teaches a non-empty set of languages.
    Teacher {
        taught_languages: BTreeSet<LanguageCode>,
    },
}

impl Profile {
    /// Role implied by this profile.
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Profile::Student { .. } => Role::Student,
            Profile::Teacher { .. } => Role::Teacher,
        }
    }

    /// Whether this profile teaches `language`.
    #[must_use]
    pub fn teaches(&self, language: &LanguageCode) -> bool {
        match self {
            Profile::Teacher { taught_languages } => taught_languages.contains(language),
            Profile::Student { .. } => false,
        }
    }

    /// Declared languages, in sorted order.
    #[must_use]
    pub fn languages(&self) -> Vec<LanguageCode> {
        match self {
            Profile::Student { target_language } => vec![target_language.clone()],
            Profile::Teacher { taught_languages } => taught_languages.iter().cloned().collect(),
        }
    }
}

/// Registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    /// Identifier supplied by the identity layer. Generated when absent.
    #[serde(default)]
    pub id: Option<UserId>,
    pub display_name: String,
    pub role: Role,
    pub languages: Vec<LanguageCode>,
}

impl NewUser {
    /// Validate the request and build the immutable profile.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` when the display name is blank or too long, when a
    /// student does not declare exactly one language, when a teacher declares
    /// none, or when a language is not supported.
    pub fn validate(
        &self,
        supported: &BTreeSet<LanguageCode>,
    ) -> Result<(String, Profile), TalkError> {
        let display_name = self.display_name.trim();
        if display_name.is_empty() {
            return Err(TalkError::InvalidRequest(
                "display name is required".to_string(),
            ));
        }
        if display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
            return Err(TalkError::InvalidRequest(format!(
                "display name exceeds {MAX_DISPLAY_NAME_LEN} characters"
            )));
        }

        if let Some(unsupported) = self.languages.iter().find(|l| !supported.contains(l)) {
            return Err(TalkError::InvalidRequest(format!(
                "language {unsupported} is not supported"
            )));
        }

        let languages: BTreeSet<LanguageCode> = self.languages.iter().cloned().collect();
        let profile = match self.role {
            Role::Student => {
                let mut iter = languages.into_iter();
                match (iter.next(), iter.next()) {
                    (Some(target_language), None) => Profile::Student { target_language },
                    _ => {
                        return Err(TalkError::InvalidRequest(
                            "a student must choose exactly one language".to_string(),
                        ))
                    }
                }
            }
            Role::Teacher => {
                if languages.is_empty() {
                    return Err(TalkError::InvalidRequest(
                        "a teacher must choose at least one language".to_string(),
                    ));
                }
                Profile::Teacher {
                    taught_languages: languages,
                }
            }
        };

        Ok((display_name.to_string(), profile))
    }
}

/// A registered participant.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub profile: Profile,
    pub availability: Availability,
    pub registered_at: DateTime<Utc>,
    /// Wall-clock end of the last completed session.
    pub last_completed_at: Option<DateTime<Utc>>,
    /// Monotonic end of the last completed session (fairness ordering).
    pub last_completed: Option<Instant>,
}

impl User {
    /// Role of this user.
    #[must_use]
    pub fn role(&self) -> Role {
        self.profile.role()
    }

    /// Build the external view, attaching the ledger balance.
    #[must_use]
    pub fn to_view(&self, points: u64) -> UserView {
        UserView {
            id: self.id,
            display_name: self.display_name.clone(),
            role: self.role(),
            languages: self.profile.languages(),
            availability: self.availability,
            points,
            registered_at: self.registered_at,
            last_completed_at: self.last_completed_at,
        }
    }
}

/// External (and durable) shape of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
    pub languages: Vec<LanguageCode>,
    pub availability: Availability,
    pub points: u64,
    pub registered_at: DateTime<Utc>,
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// An available teacher as seen by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeacherEntry {
    pub id: UserId,
    pub taught_languages: BTreeSet<LanguageCode>,
    pub last_completed: Option<Instant>,
}

/// Immutable view of the directory at one point in time.
///
/// Mutations after the snapshot was taken do not affect it.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    /// Available teachers in registration order.
    teachers: Vec<TeacherEntry>,
    /// Number of registered users.
    pub total_users: usize,
    /// Number of users currently `available`.
    pub available_users: usize,
    /// Number of users currently `in_session`.
    pub in_session_users: usize,
}

impl DirectorySnapshot {
    /// Available teachers teaching `language`, in registration order.
    ///
    /// The returned iterator is lazy and can be cloned to restart the scan.
    pub fn available_teachers<'a>(
        &'a self,
        language: &'a LanguageCode,
    ) -> impl Iterator<Item = &'a TeacherEntry> + Clone + 'a {
        self.teachers
            .iter()
            .filter(move |t| t.taught_languages.contains(language))
    }

    /// Number of available teachers across all languages.
    #[must_use]
    pub fn available_teacher_count(&self) -> usize {
        self.teachers.len()
    }
}

/// Registry of all users.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<UserId, User>,
    /// Registration order.
    order: Vec<UserId>,
    snapshot: Arc<DirectorySnapshot>,
    dirty: bool,
}

impl UserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new user. New users start `offline`.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if validation fails or the supplied ID is taken.
    pub fn register(
        &mut self,
        new_user: &NewUser,
        supported: &BTreeSet<LanguageCode>,
        now: DateTime<Utc>,
    ) -> Result<&User, TalkError> {
        let (display_name, profile) = new_user.validate(supported)?;
        let id = new_user.id.unwrap_or_default();

        if self.users.contains_key(&id) {
            return Err(TalkError::InvalidRequest(
                "user is already registered".to_string(),
            ));
        }

        let user = User {
            id,
            display_name,
            profile,
            availability: Availability::Offline,
            registered_at: now,
            last_completed_at: None,
            last_completed: None,
        };

        debug!(
            target: "talk.directory",
            user_id = %id,
            role = %user.role(),
            "User registered"
        );

        self.order.push(id);
        self.dirty = true;
        Ok(self.users.entry(id).or_insert(user))
    }

    /// Look up a user.
    #[must_use]
    pub fn get(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    /// Look up a user, failing with `NotFound`.
    pub fn require(&self, id: &UserId) -> Result<&User, TalkError> {
        self.users
            .get(id)
            .ok_or_else(|| TalkError::NotFound("User not found".to_string()))
    }

    fn require_mut(&mut self, id: &UserId) -> Result<&mut User, TalkError> {
        self.users
            .get_mut(id)
            .ok_or_else(|| TalkError::NotFound("User not found".to_string()))
    }

    /// Mark a user available for matching. Idempotent for available users.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown users, `AlreadyInSession` while in a session.
    pub fn set_available(&mut self, id: &UserId) -> Result<Availability, TalkError> {
        let user = self.require_mut(id)?;
        let previous = user.availability;
        if previous == Availability::InSession {
            return Err(TalkError::AlreadyInSession);
        }
        user.availability = Availability::Available;
        self.dirty |= previous != Availability::Available;
        Ok(previous)
    }

    /// Move an available user into a session.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown users, `InvalidTransition` unless currently available.
    pub fn set_in_session(&mut self, id: &UserId) -> Result<(), TalkError> {
        let user = self.require_mut(id)?;
        if user.availability != Availability::Available {
            return Err(TalkError::InvalidTransition {
                from: user.availability.as_str(),
                to: Availability::InSession.as_str(),
            });
        }
        user.availability = Availability::InSession;
        self.dirty = true;
        Ok(())
    }

    /// Take a user offline. Returns the previous availability so the caller
    /// can abort an open session when it was `InSession`.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown users.
    pub fn set_offline(&mut self, id: &UserId) -> Result<Availability, TalkError> {
        let user = self.require_mut(id)?;
        let previous = user.availability;
        user.availability = Availability::Offline;
        self.dirty |= previous != Availability::Offline;
        Ok(previous)
    }

    /// Return a user from a finished session to `available`.
    ///
    /// Users who went offline meanwhile stay offline.
    pub fn release(&mut self, id: &UserId) -> Option<Availability> {
        let user = self.users.get_mut(id)?;
        if user.availability == Availability::InSession {
            user.availability = Availability::Available;
            self.dirty = true;
        }
        Some(user.availability)
    }

    /// Record the end of a completed session for fairness ordering.
    pub fn record_completion(&mut self, id: &UserId, at: Instant, wall: DateTime<Utc>) {
        if let Some(user) = self.users.get_mut(id) {
            user.last_completed = Some(at);
            user.last_completed_at = Some(wall);
            self.dirty = true;
        }
    }

    /// All users in registration order.
    pub fn users(&self) -> impl Iterator<Item = &User> + '_ {
        self.order.iter().filter_map(|id| self.users.get(id))
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Whether a mutation happened since the last snapshot.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Current snapshot, rebuilt if the directory changed since the last call.
    pub fn snapshot(&mut self) -> Arc<DirectorySnapshot> {
        if self.dirty {
            self.snapshot = Arc::new(self.build_snapshot());
            self.dirty = false;
        }
        Arc::clone(&self.snapshot)
    }

    fn build_snapshot(&self) -> DirectorySnapshot {
        let mut snapshot = DirectorySnapshot {
            total_users: self.users.len(),
            ..DirectorySnapshot::default()
        };

        for user in self.users() {
            match user.availability {
                Availability::Available => snapshot.available_users += 1,
                Availability::InSession => snapshot.in_session_users += 1,
                Availability::Offline => {}
            }

            if let (Availability::Available, Profile::Teacher { taught_languages }) =
                (user.availability, &user.profile)
            {
                snapshot.teachers.push(TeacherEntry {
                    id: user.id,
                    taught_languages: taught_languages.clone(),
                    last_completed: user.last_completed,
                });
            }
        }

        snapshot
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn lang(code: &str) -> LanguageCode {
        LanguageCode::parse(code).unwrap()
    }

    fn supported() -> BTreeSet<LanguageCode> {
        ["ja", "en", "es", "fr"].into_iter().map(lang).collect()
    }

    fn teacher(name: &str, langs: &[&str]) -> NewUser {
        NewUser {
            id: None,
            display_name: name.to_string(),
            role: Role::Teacher,
            languages: langs.iter().map(|l| lang(l)).collect(),
        }
    }

    fn student(name: &str, target: &str) -> NewUser {
        NewUser {
            id: None,
            display_name: name.to_string(),
            role: Role::Student,
            languages: vec![lang(target)],
        }
    }

    fn register(dir: &mut UserDirectory, new_user: &NewUser) -> UserId {
        dir.register(new_user, &supported(), Utc::now()).unwrap().id
    }

    #[test]
    fn test_register_starts_offline() {
        let mut dir = UserDirectory::new();
        let id = register(&mut dir, &student("Sakura", "en"));

        let user = dir.get(&id).unwrap();
        assert_eq!(user.availability, Availability::Offline);
        assert_eq!(user.role(), Role::Student);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_register_validation() {
        let mut dir = UserDirectory::new();

        let blank = student("   ", "en");
        assert!(matches!(
            dir.register(&blank, &supported(), Utc::now()),
            Err(TalkError::InvalidRequest(_))
        ));

        let mut two_targets = student("Ken", "en");
        two_targets.languages.push(lang("fr"));
        assert!(matches!(
            dir.register(&two_targets, &supported(), Utc::now()),
            Err(TalkError::InvalidRequest(_))
        ));

        let no_langs = teacher("Ana", &[]);
        assert!(matches!(
            dir.register(&no_langs, &supported(), Utc::now()),
            Err(TalkError::InvalidRequest(_))
        ));

        let unsupported = teacher("Ana", &["en", "de"]);
        assert!(matches!(
            dir.register(&unsupported, &supported(), Utc::now()),
            Err(TalkError::InvalidRequest(msg)) if msg.contains("de")
        ));

        assert!(dir.is_empty());
    }

    #[test]
    fn test_register_duplicate_language_for_student_collapses() {
        let mut dir = UserDirectory::new();
        let mut s = student("Ken", "en");
        s.languages.push(lang("EN"));
        let id = register(&mut dir, &s);
        assert_eq!(dir.get(&id).unwrap().profile.languages(), vec![lang("en")]);
    }

    #[test]
    fn test_register_rejects_taken_id() {
        let mut dir = UserDirectory::new();
        let mut first = student("Ken", "en");
        first.id = Some(UserId::new());
        register(&mut dir, &first);

        assert!(matches!(
            dir.register(&first, &supported(), Utc::now()),
            Err(TalkError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_set_available_transitions() {
        let mut dir = UserDirectory::new();
        let id = register(&mut dir, &student("Ken", "en"));

        assert_eq!(dir.set_available(&id).unwrap(), Availability::Offline);
        // Idempotent
        assert_eq!(dir.set_available(&id).unwrap(), Availability::Available);

        dir.set_in_session(&id).unwrap();
        assert_eq!(dir.set_available(&id), Err(TalkError::AlreadyInSession));

        assert_eq!(
            dir.set_available(&UserId::new()),
            Err(TalkError::NotFound("User not found".to_string()))
        );
    }

    #[test]
    fn test_set_in_session_requires_available() {
        let mut dir = UserDirectory::new();
        let id = register(&mut dir, &student("Ken", "en"));

        assert_eq!(
            dir.set_in_session(&id),
            Err(TalkError::InvalidTransition {
                from: "offline",
                to: "in_session"
            })
        );

        dir.set_available(&id).unwrap();
        dir.set_in_session(&id).unwrap();
        assert!(matches!(
            dir.set_in_session(&id),
            Err(TalkError::InvalidTransition { from: "in_session", .. })
        ));
    }

    #[test]
    fn test_set_offline_reports_previous_state() {
        let mut dir = UserDirectory::new();
        let id = register(&mut dir, &student("Ken", "en"));
        dir.set_available(&id).unwrap();
        dir.set_in_session(&id).unwrap();

        assert_eq!(dir.set_offline(&id).unwrap(), Availability::InSession);
        assert_eq!(dir.set_offline(&id).unwrap(), Availability::Offline);
    }

    #[test]
    fn test_release_keeps_offline_users_offline() {
        let mut dir = UserDirectory::new();
        let a = register(&mut dir, &student("Ken", "en"));
        let b = register(&mut dir, &teacher("Ana", &["en"]));
        for id in [a, b] {
            dir.set_available(&id).unwrap();
            dir.set_in_session(&id).unwrap();
        }
        dir.set_offline(&b).unwrap();

        assert_eq!(dir.release(&a), Some(Availability::Available));
        assert_eq!(dir.release(&b), Some(Availability::Offline));
        assert_eq!(dir.release(&UserId::new()), None);
    }

    #[test]
    fn test_available_teachers_in_insertion_order() {
        let mut dir = UserDirectory::new();
        let t1 = register(&mut dir, &teacher("T1", &["en", "fr"]));
        let t2 = register(&mut dir, &teacher("T2", &["ja"]));
        let t3 = register(&mut dir, &teacher("T3", &["en"]));
        let s = register(&mut dir, &student("S", "en"));
        for id in [t3, t2, t1, s] {
            dir.set_available(&id).unwrap();
        }

        let snapshot = dir.snapshot();
        let en = lang("en");
        let ids: Vec<UserId> = snapshot.available_teachers(&en).map(|t| t.id).collect();
        assert_eq!(ids, vec![t1, t3]);
        assert_eq!(snapshot.available_teacher_count(), 3);
        assert_eq!(snapshot.available_users, 4);
    }

    #[test]
    fn test_available_teachers_is_restartable() {
        let mut dir = UserDirectory::new();
        let t1 = register(&mut dir, &teacher("T1", &["en"]));
        dir.set_available(&t1).unwrap();

        let snapshot = dir.snapshot();
        let en = lang("en");
        let iter = snapshot.available_teachers(&en);
        assert_eq!(iter.clone().count(), 1);
        assert_eq!(iter.map(|t| t.id).collect::<Vec<_>>(), vec![t1]);
    }

    #[test]
    fn test_snapshot_is_not_a_live_view() {
        let mut dir = UserDirectory::new();
        let t1 = register(&mut dir, &teacher("T1", &["en"]));
        dir.set_available(&t1).unwrap();

        let before = dir.snapshot();
        dir.set_offline(&t1).unwrap();
        let after = dir.snapshot();

        let en = lang("en");
        assert_eq!(before.available_teachers(&en).count(), 1);
        assert_eq!(after.available_teachers(&en).count(), 0);
    }

    #[test]
    fn test_snapshot_reused_when_clean() {
        let mut dir = UserDirectory::new();
        register(&mut dir, &teacher("T1", &["en"]));
        let first = dir.snapshot();
        assert!(!dir.is_dirty());
        let second = dir.snapshot();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
