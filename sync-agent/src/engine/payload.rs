//! Generic readers over loosely-typed engine payloads.
//!
//! Engine payloads arrive as JSON whose inner nodes may be either direct
//! mappings or record-shaped objects with named fields, and whose numeric
//! fields show up as integers, floats, or numeric strings depending on the
//! engine version. The normalizer reads everything through this view and
//! never touches the underlying shape.

use serde_json::Value;

/// Read-only view over a payload node.
#[derive(Debug, Clone, Copy)]
pub struct PayloadView<'a> {
    root: &'a Value,
}

impl<'a> PayloadView<'a> {
    pub fn new(root: &'a Value) -> Self {
        Self { root }
    }

    fn node(&self, path: &[&str]) -> Option<&'a Value> {
        let mut cur = self.root;
        for key in path {
            cur = cur.get(key)?;
        }
        Some(cur)
    }

    /// String at `path`, if present and string-typed.
    pub fn str_at(&self, path: &[&str]) -> Option<&'a str> {
        self.node(path)?.as_str()
    }

    /// Integer at `path`, coercing integer, float, and numeric-string forms.
    pub fn int_at(&self, path: &[&str]) -> Option<i64> {
        match self.node(path)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_u64().map(|u| u.min(i64::MAX as u64) as i64))
                .or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok().or_else(|| {
                s.trim().parse::<f64>().ok().map(|f| f as i64)
            }),
            _ => None,
        }
    }

    /// Float at `path`, with the same coercions as `int_at`.
    pub fn float_at(&self, path: &[&str]) -> Option<f64> {
        match self.node(path)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Enumerate the entries of the mapping at `path`.
    ///
    /// Both direct mappings and record-shaped objects enumerate the same
    /// way; non-object nodes yield nothing.
    pub fn entries(&self, path: &[&str]) -> Vec<(&'a str, PayloadView<'a>)> {
        match self.node(path) {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.as_str(), PayloadView::new(v)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_str_at_nested() {
        let v = json!({"folder": "docs", "item": {"name": "a.txt"}});
        let view = PayloadView::new(&v);
        assert_eq!(view.str_at(&["folder"]), Some("docs"));
        assert_eq!(view.str_at(&["item", "name"]), Some("a.txt"));
        assert_eq!(view.str_at(&["missing"]), None);
    }

    #[test]
    fn test_int_coercion() {
        let v = json!({"a": 42, "b": 42.9, "c": "42", "d": "42.9", "e": true});
        let view = PayloadView::new(&v);
        assert_eq!(view.int_at(&["a"]), Some(42));
        assert_eq!(view.int_at(&["b"]), Some(42));
        assert_eq!(view.int_at(&["c"]), Some(42));
        assert_eq!(view.int_at(&["d"]), Some(42));
        assert_eq!(view.int_at(&["e"]), None);
    }

    #[test]
    fn test_float_coercion() {
        let v = json!({"rate": "12.5", "count": 7});
        let view = PayloadView::new(&v);
        assert_eq!(view.float_at(&["rate"]), Some(12.5));
        assert_eq!(view.float_at(&["count"]), Some(7.0));
    }

    #[test]
    fn test_entries_nested_maps() {
        let v = json!({
            "docs": {
                "a.txt": {"BytesTotal": 100, "BytesDone": 50},
                "b.txt": {"BytesTotal": 200, "BytesDone": 200}
            }
        });
        let view = PayloadView::new(&v);
        let folders = view.entries(&[]);
        assert_eq!(folders.len(), 1);
        let (folder, folder_view) = folders[0];
        assert_eq!(folder, "docs");

        let files = folder_view.entries(&[]);
        assert_eq!(files.len(), 2);
        let (name, file_view) = files[0];
        assert_eq!(name, "a.txt");
        assert_eq!(file_view.int_at(&["BytesTotal"]), Some(100));
        assert_eq!(file_view.int_at(&["BytesDone"]), Some(50));
    }

    #[test]
    fn test_entries_non_object() {
        let v = json!({"list": [1, 2, 3]});
        let view = PayloadView::new(&v);
        assert!(view.entries(&["list"]).is_empty());
        assert!(view.entries(&["missing"]).is_empty());
    }
}
