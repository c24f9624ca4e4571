//! Observer key interest.
//!
//! ```text
//! keys = None or contains "*"  → All
//! keys = []                    → None (explicit no-interest)
//! keys = ["b", "a", "a"]       → Keys(["a", "b"])
//! ```

/// What part of the state an observer wants to receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// Full state.
    All,
    /// Sorted, deduplicated dotted key paths.
    Keys(Vec<String>),
    /// Nothing.
    None,
}

impl Interest {
    /// Normalizes a raw key list.
    pub fn from_keys<S: AsRef<str>>(keys: Option<&[S]>) -> Self {
        let Some(keys) = keys else {
            return Interest::All;
        };
        if keys.iter().any(|k| k.as_ref() == "*") {
            return Interest::All;
        }
        if keys.is_empty() {
            return Interest::None;
        }
        let mut keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        keys.sort_unstable();
        keys.dedup();
        Interest::Keys(keys)
    }

    /// Combines an existing interest with a new subscription.
    ///
    /// `All` is only replaced by another `All`; key sets are unioned.
    pub fn merge(self, other: Interest) -> Interest {
        match (self, other) {
            (_, Interest::All) | (Interest::All, _) => Interest::All,
            (Interest::Keys(mut a), Interest::Keys(b)) => {
                a.extend(b);
                a.sort_unstable();
                a.dedup();
                Interest::Keys(a)
            }
            (Interest::Keys(a), Interest::None) => Interest::Keys(a),
            (Interest::None, other) => other,
        }
    }

    /// Removes `keys` from a key interest. `All` and `None` are unchanged.
    pub fn without(self, keys: &[String]) -> Interest {
        match self {
            Interest::Keys(mut current) => {
                current.retain(|k| !keys.contains(k));
                if current.is_empty() {
                    Interest::None
                } else {
                    Interest::Keys(current)
                }
            }
            other => other,
        }
    }

    /// Subscribed key paths, if this is a key interest.
    pub fn keys(&self) -> Option<&[String]> {
        match self {
            Interest::Keys(keys) => Some(keys),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(k: &[&str]) -> Interest {
        Interest::from_keys(Some(k))
    }

    #[test]
    fn normalization() {
        assert_eq!(Interest::from_keys::<&str>(None), Interest::All);
        assert_eq!(keys(&["counter", "*"]), Interest::All);
        assert_eq!(keys(&[]), Interest::None);
        assert_eq!(
            keys(&["theme", "counter", "theme"]),
            Interest::Keys(vec!["counter".into(), "theme".into()])
        );
    }

    #[test]
    fn narrow_subscriptions_are_additive() {
        let merged = keys(&["counter"]).merge(keys(&["theme"]));
        assert_eq!(merged, Interest::Keys(vec!["counter".into(), "theme".into()]));
    }

    #[test]
    fn full_interest_is_sticky() {
        assert_eq!(Interest::All.merge(keys(&["counter"])), Interest::All);
        assert_eq!(keys(&["counter"]).merge(Interest::All), Interest::All);
        assert_eq!(Interest::None.merge(keys(&["a"])), keys(&["a"]));
    }

    #[test]
    fn removing_last_key_leaves_no_interest() {
        let i = keys(&["a", "b"]).without(&["a".to_string()]);
        assert_eq!(i, keys(&["b"]));
        assert_eq!(i.without(&["b".to_string()]), Interest::None);
        assert_eq!(Interest::All.without(&["a".to_string()]), Interest::All);
    }
}
