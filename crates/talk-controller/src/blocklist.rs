//! `BlockList` - symmetric, permanent student/teacher exclusions.

use chrono::{DateTime, Utc};
use common::types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A recorded exclusion between a student and a teacher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEdge {
    pub student_id: UserId,
    pub teacher_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Unordered pair key so that `(a, b)` and `(b, a)` collide.
fn pair_key(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Registry of block edges. Edges are never removed.
#[derive(Debug, Default)]
pub struct BlockList {
    edges: HashMap<(UserId, UserId), BlockEdge>,
    /// Insertion order, for export.
    order: Vec<(UserId, UserId)>,
}

impl BlockList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the pair is blocked, in either direction.
    #[must_use]
    pub fn is_blocked(&self, student_id: UserId, teacher_id: UserId) -> bool {
        self.edges.contains_key(&pair_key(student_id, teacher_id))
    }

    /// Register an edge. Returns `false` when the edge already existed.
    pub fn block(&mut self, student_id: UserId, teacher_id: UserId, now: DateTime<Utc>) -> bool {
        let key = pair_key(student_id, teacher_id);
        if self.edges.contains_key(&key) {
            return false;
        }
        self.edges.insert(
            key,
            BlockEdge {
                student_id,
                teacher_id,
                created_at: now,
            },
        );
        self.order.push(key);
        true
    }

    /// All edges in the order they were registered.
    pub fn edges(&self) -> impl Iterator<Item = &BlockEdge> + '_ {
        self.order.iter().filter_map(|key| self.edges.get(key))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
