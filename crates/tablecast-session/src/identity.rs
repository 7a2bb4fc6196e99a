//! Identity types: who a connection belongs to and which rooms that
//! implies.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Room naming
// ---------------------------------------------------------------------------

/// Name of the room that carries events for a whole branch.
pub fn branch_room(branch_id: &str) -> String {
    format!("branch:{branch_id}")
}

/// Name of the room that carries events for a single table.
pub fn table_room(table_id: &str) -> String {
    format!("table:{table_id}")
}

// ---------------------------------------------------------------------------
// ScopeKind
// ---------------------------------------------------------------------------

/// What kind of principal a token was issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// Restaurant staff. `scope_ids` lists every branch they may see.
    Staff,
    /// A guest ordering at a table. `scope_ids` is `[branch_id, table_id]`.
    Customer,
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The verified identity behind a token.
///
/// Mirrors what the platform's auth service hands back:
/// `{ subjectId, scopeKind, scopeIds[] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub subject_id: String,
    pub scope_kind: ScopeKind,
    #[serde(default)]
    pub scope_ids: Vec<String>,
}

impl Identity {
    pub fn new(
        subject_id: impl Into<String>,
        scope_kind: ScopeKind,
        scope_ids: Vec<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            scope_kind,
            scope_ids,
        }
    }

    /// Rooms a connection with this identity joins right after `auth`.
    ///
    /// - staff: one `branch:<id>` room per authorized branch, duplicates
    ///   collapsed, in the order given
    /// - customer: its `branch:<id>` room, then its `table:<id>` room;
    ///   whichever id is missing is skipped
    pub fn auto_join_rooms(&self) -> Vec<String> {
        match self.scope_kind {
            ScopeKind::Staff => {
                let mut rooms: Vec<String> = Vec::new();
                for id in &self.scope_ids {
                    let room = branch_room(id);
                    if !rooms.contains(&room) {
                        rooms.push(room);
                    }
                }
                rooms
            }
            ScopeKind::Customer => {
                let mut ids = self.scope_ids.iter();
                let branch = ids.next().map(|id| branch_room(id));
                let table = ids.next().map(|id| table_room(id));
                branch.into_iter().chain(table).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staff_joins_every_branch() {
        let id = Identity::new(
            "staff-1",
            ScopeKind::Staff,
            vec!["b1".into(), "b2".into()],
        );
        assert_eq!(id.auto_join_rooms(), vec!["branch:b1", "branch:b2"]);
    }

    #[test]
    fn test_staff_duplicate_branches_collapse() {
        let id = Identity::new(
            "staff-1",
            ScopeKind::Staff,
            vec!["b1".into(), "b1".into()],
        );
        assert_eq!(id.auto_join_rooms(), vec!["branch:b1"]);
    }

    #[test]
    fn test_staff_without_branches_joins_nothing() {
        let id = Identity::new("staff-1", ScopeKind::Staff, vec![]);
        assert!(id.auto_join_rooms().is_empty());
    }

    #[test]
    fn test_customer_joins_branch_and_table() {
        let id = Identity::new(
            "guest-9",
            ScopeKind::Customer,
            vec!["b3".into(), "t12".into()],
        );
        assert_eq!(id.auto_join_rooms(), vec!["branch:b3", "table:t12"]);
    }

    #[test]
    fn test_customer_without_table_joins_branch_only() {
        let id = Identity::new("guest-9", ScopeKind::Customer, vec!["b3".into()]);
        assert_eq!(id.auto_join_rooms(), vec!["branch:b3"]);
    }

    #[test]
    fn test_identity_json_uses_camel_case() {
        let id: Identity = serde_json::from_str(
            r#"{"subjectId":"u1","scopeKind":"customer","scopeIds":["b","t"]}"#,
        )
        .unwrap();
        assert_eq!(id.subject_id, "u1");
        assert_eq!(id.scope_kind, ScopeKind::Customer);
        assert_eq!(id.scope_ids, vec!["b", "t"]);
    }
}
