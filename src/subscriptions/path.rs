//! Dotted-path access into JSON state.

use serde_json::{Map, Value};

/// Value at `path` (`"user.profile.name"`). Numeric segments index arrays.
pub fn get_path<'a>(state: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(state, |cur, seg| match cur {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Writes `value` at `path`, creating intermediate objects.
pub fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut cur = target;
    while let Some(seg) = segments.next() {
        if segments.peek().is_none() {
            cur.insert(seg.to_string(), value);
            return;
        }
        let slot = cur
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        cur = next;
    }
}

/// Partial state holding only `keys`, nested like the original paths.
/// Missing paths are skipped.
pub fn extract(state: &Value, keys: &[String]) -> Map<String, Value> {
    let mut out = Map::new();
    for key in keys {
        if let Some(v) = get_path(state, key) {
            set_path(&mut out, key, v.clone());
        }
    }
    out
}

/// True if any of `keys` holds a structurally different value in `prev` and `next`.
pub fn any_changed(prev: &Value, next: &Value, keys: &[String]) -> bool {
    keys.iter().any(|k| get_path(prev, k) != get_path(next, k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_get_and_arrays() {
        let s = json!({"user": {"name": "ada", "tags": ["x", "y"]}});
        assert_eq!(get_path(&s, "user.name"), Some(&json!("ada")));
        assert_eq!(get_path(&s, "user.tags.1"), Some(&json!("y")));
        assert_eq!(get_path(&s, "user.email"), None);
    }

    #[test]
    fn extract_rebuilds_nesting() {
        let s = json!({"user": {"name": "ada", "email": "a@b"}, "counter": 4, "theme": "dark"});
        let keys = vec!["counter".to_string(), "user.name".to_string(), "missing".to_string()];
        assert_eq!(
            Value::Object(extract(&s, &keys)),
            json!({"counter": 4, "user": {"name": "ada"}})
        );
    }

    #[test]
    fn change_detection_is_structural() {
        let prev = json!({"counter": 4, "user": {"name": "ada"}});
        let next = json!({"counter": 4, "user": {"name": "ada"}, "theme": "dark"});
        let counter = vec!["counter".to_string()];
        let user = vec!["user".to_string()];
        let theme = vec!["theme".to_string()];
        assert!(!any_changed(&prev, &next, &counter));
        assert!(!any_changed(&prev, &next, &user));
        assert!(any_changed(&prev, &next, &theme));
    }
}
