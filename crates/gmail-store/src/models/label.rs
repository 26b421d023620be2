//! Label model representing a per-user Gmail label

use serde::{Deserialize, Serialize};

use super::UserId;

/// A Gmail label (e.g., "INBOX", "STARRED", "Clients/Acme")
///
/// Labels are scoped to one mailbox; two users can each own a label
/// with the same name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    /// Owner of the mailbox the label belongs to
    pub user_id: UserId,
    /// Display name, also what filters match against
    pub name: String,
}

impl Label {
    pub fn new(user_id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
        }
    }
}

/// Capability of records that carry a set of labels
pub trait LabelBearing {
    fn labels(&self) -> &[Label];

    fn has_labels(&self) -> bool {
        !self.labels().is_empty()
    }

    /// Whether a label with this exact name is attached
    fn match_label(&self, name: &str) -> bool {
        self.labels().iter().any(|label| label.name == name)
    }

    /// Whether at least one of `names` is attached. An empty `names` never matches.
    fn match_any_label(&self, names: &[String]) -> bool {
        names.iter().any(|name| self.match_label(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagged(Vec<Label>);

    impl LabelBearing for Tagged {
        fn labels(&self) -> &[Label] {
            &self.0
        }
    }

    #[test]
    fn test_match_label() {
        let tagged = Tagged(vec![Label::new("u1", "INBOX"), Label::new("u1", "Work")]);
        assert!(tagged.has_labels());
        assert!(tagged.match_label("Work"));
        assert!(!tagged.match_label("work"));
    }

    #[test]
    fn test_match_any_label_empty_set_matches_nothing() {
        let tagged = Tagged(vec![Label::new("u1", "INBOX")]);
        assert!(!tagged.match_any_label(&[]));
        assert!(tagged.match_any_label(&["SENT".to_string(), "INBOX".to_string()]));
    }

    #[test]
    fn test_no_labels() {
        let tagged = Tagged(Vec::new());
        assert!(!tagged.has_labels());
        assert!(!tagged.match_any_label(&["INBOX".to_string()]));
    }
}
