//! Per-binding ownership state and its transition function.
//!
//! `transition` is pure: it maps a state and an event to the next state and
//! an optional violation. The trackers fold events through it in source
//! order, and branch joins reduce per-arm final states with `join`, which is
//! associative and commutative up to which move location is kept.

use crate::compiler::span::Span;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ownership state of one binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnershipState {
    /// Holds a value and may be used freely.
    Initialized,
    /// Moved on every path reaching this point.
    FullyMoved { at: Span },
    /// Some field paths were moved. Keys are dotted paths (`"a.b"`).
    PartiallyMoved { fields: BTreeMap<String, Span> },
    /// Moved on some but not all paths reaching this point.
    ConditionallyMoved { at: Span },
    /// The binding is itself a shared reference.
    Borrowed,
    /// The binding is itself a mutable reference.
    BorrowedMut,
}

impl OwnershipState {
    /// Fully or conditionally moved: the value may not be read.
    pub fn is_moved(&self) -> bool {
        matches!(
            self,
            OwnershipState::FullyMoved { .. } | OwnershipState::ConditionallyMoved { .. }
        )
    }

    pub fn is_partially_moved(&self) -> bool {
        matches!(self, OwnershipState::PartiallyMoved { .. })
    }

    fn moved_at(&self) -> Option<Span> {
        match self {
            OwnershipState::FullyMoved { at } | OwnershipState::ConditionallyMoved { at } => {
                Some(*at)
            }
            _ => None,
        }
    }

    /// Least upper bound of two path states.
    pub fn join(&self, other: &OwnershipState) -> OwnershipState {
        use OwnershipState::*;
        match (self, other) {
            (FullyMoved { at }, FullyMoved { .. }) => FullyMoved { at: *at },
            (a, b) if a.is_moved() || b.is_moved() => ConditionallyMoved {
                at: a.moved_at().or(b.moved_at()).unwrap_or_else(Span::dummy),
            },
            (PartiallyMoved { fields: f }, PartiallyMoved { fields: g }) => {
                let mut merged = f.clone();
                for (path, span) in g {
                    merged.entry(path.clone()).or_insert(*span);
                }
                PartiallyMoved {
                    fields: normalize(merged),
                }
            }
            (p @ PartiallyMoved { .. }, _) | (_, p @ PartiallyMoved { .. }) => p.clone(),
            (a, _) => a.clone(),
        }
    }
}

/// Something that happens to a binding (or one of its field paths).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    /// The place is read without transferring ownership (includes copies).
    Read { path: &'a [String], span: Span },
    /// Ownership of the place is transferred out.
    Move { path: &'a [String], span: Span },
    /// The place is overwritten with a fresh value.
    Reinit { path: &'a [String] },
}

/// Why an event is not allowed in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The accessed place, or a place containing it, was moved.
    UseAfterMove { moved_at: Span, conditional: bool },
    /// The accessed place contains a moved field.
    PartialMove { field: String, moved_at: Span },
}

pub fn dotted(path: &[String]) -> String {
    path.join(".")
}

fn segments(key: &str) -> Vec<&str> {
    key.split('.').collect()
}

/// `prefix` is a (non-strict) prefix of `path`.
fn is_prefix(prefix: &[&str], path: &[String]) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path).all(|(a, b)| *a == b.as_str())
}

/// Drop moved paths already covered by a shorter moved path.
fn normalize(fields: BTreeMap<String, Span>) -> BTreeMap<String, Span> {
    let keys: Vec<String> = fields.keys().cloned().collect();
    fields
        .into_iter()
        .filter(|(k, _)| {
            let ks = segments(k);
            !keys.iter().any(|other| {
                let os = segments(other);
                os.len() < ks.len() && os.iter().zip(&ks).all(|(a, b)| a == b)
            })
        })
        .collect()
}

fn check_access(state: &OwnershipState, path: &[String]) -> Option<Violation> {
    match state {
        OwnershipState::FullyMoved { at } => Some(Violation::UseAfterMove {
            moved_at: *at,
            conditional: false,
        }),
        OwnershipState::ConditionallyMoved { at } => Some(Violation::UseAfterMove {
            moved_at: *at,
            conditional: true,
        }),
        OwnershipState::PartiallyMoved { fields } => {
            for (key, span) in fields {
                let moved = segments(key);
                if is_prefix(&moved, path) {
                    return Some(Violation::UseAfterMove {
                        moved_at: *span,
                        conditional: false,
                    });
                }
            }
            for (key, span) in fields {
                let moved = segments(key);
                if moved.len() > path.len() && path.iter().zip(&moved).all(|(a, b)| a.as_str() == *b) {
                    return Some(Violation::PartialMove {
                        field: key.clone(),
                        moved_at: *span,
                    });
                }
            }
            None
        }
        OwnershipState::Initialized | OwnershipState::Borrowed | OwnershipState::BorrowedMut => None,
    }
}

/// Apply `event` to `state`. On violation the state is returned unchanged.
pub fn transition(state: &OwnershipState, event: Event<'_>) -> (OwnershipState, Option<Violation>) {
    match event {
        Event::Read { path, .. } => (state.clone(), check_access(state, path)),
        Event::Move { path, span } => {
            if let Some(v) = check_access(state, path) {
                return (state.clone(), Some(v));
            }
            if path.is_empty() {
                return (OwnershipState::FullyMoved { at: span }, None);
            }
            let mut fields = match state {
                OwnershipState::PartiallyMoved { fields } => fields.clone(),
                _ => BTreeMap::new(),
            };
            fields.insert(dotted(path), span);
            (
                OwnershipState::PartiallyMoved {
                    fields: normalize(fields),
                },
                None,
            )
        }
        Event::Reinit { path } => {
            if path.is_empty() {
                return (OwnershipState::Initialized, None);
            }
            match state {
                OwnershipState::FullyMoved { .. } | OwnershipState::ConditionallyMoved { .. } => {
                    (state.clone(), check_access(state, path))
                }
                OwnershipState::PartiallyMoved { fields } => {
                    // Writing inside a moved field needs the field itself first.
                    for (key, span) in fields {
                        let moved = segments(key);
                        if moved.len() < path.len() && is_prefix(&moved, path) {
                            return (
                                state.clone(),
                                Some(Violation::UseAfterMove {
                                    moved_at: *span,
                                    conditional: false,
                                }),
                            );
                        }
                    }
                    let remaining: BTreeMap<String, Span> = fields
                        .iter()
                        .filter(|(key, _)| !is_prefix_str(path, key))
                        .map(|(k, s)| (k.clone(), *s))
                        .collect();
                    if remaining.is_empty() {
                        (OwnershipState::Initialized, None)
                    } else {
                        (OwnershipState::PartiallyMoved { fields: remaining }, None)
                    }
                }
                other => (other.clone(), None),
            }
        }
    }
}

/// `path` is a (non-strict) prefix of the dotted `key`.
fn is_prefix_str(path: &[String], key: &str) -> bool {
    let ks = segments(key);
    path.len() <= ks.len() && path.iter().zip(&ks).all(|(a, b)| a.as_str() == *b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn move_then_read_is_use_after_move() {
        let (s, v) = transition(
            &OwnershipState::Initialized,
            Event::Move {
                path: &[],
                span: Span::line(2),
            },
        );
        assert!(v.is_none());
        let (_, v) = transition(
            &s,
            Event::Read {
                path: &[],
                span: Span::line(3),
            },
        );
        assert_eq!(
            v,
            Some(Violation::UseAfterMove {
                moved_at: Span::line(2),
                conditional: false
            })
        );
    }

    #[test]
    fn field_move_blocks_whole_but_not_sibling() {
        let x = p(&["x"]);
        let y = p(&["y"]);
        let (s, _) = transition(
            &OwnershipState::Initialized,
            Event::Move {
                path: &x,
                span: Span::line(2),
            },
        );
        assert!(s.is_partially_moved());
        let (_, whole) = transition(
            &s,
            Event::Read {
                path: &[],
                span: Span::line(3),
            },
        );
        assert!(matches!(whole, Some(Violation::PartialMove { ref field, .. }) if field == "x"));
        let (_, sibling) = transition(
            &s,
            Event::Read {
                path: &y,
                span: Span::line(3),
            },
        );
        assert!(sibling.is_none());
    }

    #[test]
    fn nested_read_inside_moved_field() {
        let a = p(&["a"]);
        let ab = p(&["a", "b"]);
        let (s, _) = transition(
            &OwnershipState::Initialized,
            Event::Move {
                path: &a,
                span: Span::line(4),
            },
        );
        let (_, v) = transition(
            &s,
            Event::Read {
                path: &ab,
                span: Span::line(5),
            },
        );
        assert!(matches!(v, Some(Violation::UseAfterMove { .. })));
    }

    #[test]
    fn restoring_all_fields_reinitializes() {
        let x = p(&["x"]);
        let (s, _) = transition(
            &OwnershipState::Initialized,
            Event::Move {
                path: &x,
                span: Span::line(2),
            },
        );
        let (s, v) = transition(&s, Event::Reinit { path: &x });
        assert!(v.is_none());
        assert_eq!(s, OwnershipState::Initialized);
    }

    #[test]
    fn writing_into_moved_field_is_rejected() {
        let a = p(&["a"]);
        let ab = p(&["a", "b"]);
        let (s, _) = transition(
            &OwnershipState::Initialized,
            Event::Move {
                path: &a,
                span: Span::line(2),
            },
        );
        let (_, v) = transition(&s, Event::Reinit { path: &ab });
        assert!(v.is_some());
    }

    #[test]
    fn whole_reinit_always_succeeds() {
        let moved = OwnershipState::FullyMoved { at: Span::line(1) };
        let (s, v) = transition(&moved, Event::Reinit { path: &[] });
        assert!(v.is_none());
        assert_eq!(s, OwnershipState::Initialized);
    }

    #[test]
    fn moving_parent_subsumes_child_entries() {
        let ab = p(&["a", "b"]);
        let a = p(&["a"]);
        let (s, _) = transition(
            &OwnershipState::Initialized,
            Event::Move {
                path: &ab,
                span: Span::line(2),
            },
        );
        // `a` still contains a moved field, so moving it is a partial-move error.
        let (_, v) = transition(
            &s,
            Event::Move {
                path: &a,
                span: Span::line(3),
            },
        );
        assert!(matches!(v, Some(Violation::PartialMove { .. })));
    }

    #[test]
    fn join_table() {
        use OwnershipState::*;
        let moved = FullyMoved { at: Span::line(3) };
        assert_eq!(Initialized.join(&Initialized), Initialized);
        assert_eq!(moved.join(&moved), moved);
        assert_eq!(
            moved.join(&Initialized),
            ConditionallyMoved { at: Span::line(3) }
        );
        assert_eq!(
            Initialized.join(&moved),
            ConditionallyMoved { at: Span::line(3) }
        );
    }

    #[test]
    fn join_partial_unions_fields() {
        let mut f = BTreeMap::new();
        f.insert("x".to_string(), Span::line(2));
        let mut g = BTreeMap::new();
        g.insert("y".to_string(), Span::line(4));
        let joined = OwnershipState::PartiallyMoved { fields: f }
            .join(&OwnershipState::PartiallyMoved { fields: g });
        match joined {
            OwnershipState::PartiallyMoved { fields } => assert_eq!(fields.len(), 2),
            other => panic!("expected partial move, got {:?}", other),
        }
    }

    #[test]
    fn join_is_associative_on_moved_flags() {
        use OwnershipState::*;
        let states = [
            Initialized,
            FullyMoved { at: Span::line(1) },
            ConditionallyMoved { at: Span::line(2) },
        ];
        for a in &states {
            for b in &states {
                for c in &states {
                    let left = a.join(b).join(c);
                    let right = a.join(&b.join(c));
                    assert_eq!(left.is_moved(), right.is_moved());
                    assert_eq!(
                        matches!(left, FullyMoved { .. }),
                        matches!(right, FullyMoved { .. })
                    );
                }
            }
        }
    }

    #[test]
    fn states_serialize() {
        let s = OwnershipState::ConditionallyMoved { at: Span::line(8) };
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("ConditionallyMoved"));
    }
}
