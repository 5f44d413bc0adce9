//! Pre-configured test data for talk controller tests.
//!
//! Builders produce `NewUser` registrations; `test_policy` returns the
//! production timings (30 s join window, 5 min talk, 60 s minimum).

use common::types::{LanguageCode, Role, UserId};
use talk_controller::config::SessionPolicy;
use talk_controller::directory::NewUser;

/// Parse a language code, panicking on malformed test input.
#[must_use]
pub fn lang(code: &str) -> LanguageCode {
    LanguageCode::parse(code).expect("valid test language code")
}

/// Default policy used by tests.
#[must_use]
pub fn test_policy() -> SessionPolicy {
    SessionPolicy::default()
}

/// Anything that can be registered with the coordinator.
pub trait Registration {
    fn registration(&self) -> NewUser;
}

/// Test student fixture.
#[derive(Debug, Clone)]
pub struct TestStudent {
    pub id: Option<UserId>,
    pub name: String,
    pub language: String,
}

impl TestStudent {
    /// Student learning English by default.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            language: "en".to_string(),
        }
    }

    #[must_use]
    pub fn learning(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    /// Register with a fixed id (controls teacher tie-breaks and ordering).
    #[must_use]
    pub fn with_id(mut self, id: UserId) -> Self {
        self.id = Some(id);
        self
    }
}

impl Registration for TestStudent {
    fn registration(&self) -> NewUser {
        NewUser {
            id: self.id,
            display_name: self.name.clone(),
            role: Role::Student,
            languages: vec![lang(&self.language)],
        }
    }
}

/// Test teacher fixture.
#[derive(Debug, Clone)]
pub struct TestTeacher {
    pub id: Option<UserId>,
    pub name: String,
    pub languages: Vec<String>,
}

impl TestTeacher {
    /// Teacher with no languages; add them with `teaches`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            languages: Vec::new(),
        }
    }

    #[must_use]
    pub fn teaches(mut self, language: &str) -> Self {
        self.languages.push(language.to_string());
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: UserId) -> Self {
        self.id = Some(id);
        self
    }
}

impl Registration for TestTeacher {
    fn registration(&self) -> NewUser {
        NewUser {
            id: self.id,
            display_name: self.name.clone(),
            role: Role::Teacher,
            languages: self.languages.iter().map(|l| lang(l)).collect(),
        }
    }
}

/// Deterministic user id, ordered by `n`.
#[must_use]
pub fn user_id(n: u128) -> UserId {
    UserId(uuid::Uuid::from_u128(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_fixture() {
        let student = TestStudent::new("Ken").learning("ja").registration();
        assert_eq!(student.role, Role::Student);
        assert_eq!(student.languages, vec![lang("ja")]);
    }

    #[test]
    fn test_teacher_fixture() {
        let teacher = TestTeacher::new("Ana")
            .teaches("en")
            .teaches("fr")
            .with_id(user_id(7))
            .registration();
        assert_eq!(teacher.role, Role::Teacher);
        assert_eq!(teacher.languages.len(), 2);
        assert_eq!(teacher.id, Some(user_id(7)));
    }

    #[test]
    fn test_user_ids_are_ordered() {
        assert!(user_id(1) < user_id(2));
    }
}
