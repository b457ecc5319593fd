//! Comparing a source set of key-values against a destination store.
//!
//! [`KvComparer`] decides what an import or export would add, update or
//! delete. The result drives the preview and is then replayed against the
//! destination.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};

use crate::appconfig::models::{is_json_content_type, KeyValue, APPSVC_SLOT_SETTING_TAG};

/// A field two key-values are compared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareField {
    Value,
    ContentType,
    Tags,
    Locked,
}

/// Which fields matter depends on what the other side can store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareLevel {
    /// Files only carry keys and values (and content types for JSON).
    File,
    /// App Service settings carry the slot setting tag.
    AppService,
    AppConfig,
    KvSet,
    /// Restoring to a point in time also compares the lock state.
    Restore,
}

impl CompareLevel {
    pub fn fields(self) -> &'static [CompareField] {
        match self {
            CompareLevel::File => &[CompareField::ContentType, CompareField::Value],
            CompareLevel::AppService => &[CompareField::Value, CompareField::Tags],
            CompareLevel::AppConfig | CompareLevel::KvSet => {
                &[CompareField::ContentType, CompareField::Value, CompareField::Tags]
            }
            CompareLevel::Restore => &[
                CompareField::ContentType,
                CompareField::Value,
                CompareField::Tags,
                CompareField::Locked,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KvUpdate {
    pub new: KeyValue,
    pub old: KeyValue,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvDiff {
    pub add: Vec<KeyValue>,
    pub update: Vec<KvUpdate>,
    pub delete: Vec<KeyValue>,
}

impl KvDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Key-values to write: additions, then the new side of updates.
    pub fn writes(&self) -> impl Iterator<Item = &KeyValue> {
        self.add.iter().chain(self.update.iter().map(|u| &u.new))
    }
}

pub struct KvComparer {
    src: Vec<KeyValue>,
    level: CompareLevel,
}

impl KvComparer {
    pub fn new(src: Vec<KeyValue>, level: CompareLevel) -> Self {
        KvComparer { src, level }
    }

    pub fn source(&self) -> &[KeyValue] {
        &self.src
    }

    /// Diff the source against `dest`.
    ///
    /// Entries are matched on `(key, label)`. Only `strict` reports deletions.
    /// With `ignore_matching_kvs` off, identical entries are reported as
    /// updates so they get rewritten.
    pub fn compare(&self, dest: &[KeyValue], strict: bool, ignore_matching_kvs: bool) -> KvDiff {
        let lookup: BTreeMap<(String, String), &KeyValue> =
            dest.iter().map(|kv| (kv.identity(), kv)).collect();
        let mut diff = KvDiff::default();
        let mut seen = BTreeSet::new();

        for kv in &self.src {
            let identity = kv.identity();
            match lookup.get(&identity) {
                None => diff.add.push(kv.clone()),
                Some(existing) => {
                    if !ignore_matching_kvs || !self.matches(kv, existing) {
                        diff.update.push(KvUpdate {
                            new: kv.clone(),
                            old: (*existing).clone(),
                        });
                    }
                }
            }
            seen.insert(identity);
        }

        if strict {
            diff.delete = dest
                .iter()
                .filter(|kv| !seen.contains(&kv.identity()))
                .cloned()
                .collect();
        }
        diff
    }

    fn matches(&self, src: &KeyValue, dest: &KeyValue) -> bool {
        self.level.fields().iter().all(|field| match field {
            CompareField::Value => values_equal(src, dest),
            CompareField::ContentType => {
                src.content_type.as_deref().unwrap_or("")
                    == dest.content_type.as_deref().unwrap_or("")
            }
            CompareField::Tags => src.tags == dest.tags,
            CompareField::Locked => src.locked == dest.locked,
        })
    }
}

/// JSON content types compare structurally so formatting changes are not updates.
fn values_equal(src: &KeyValue, dest: &KeyValue) -> bool {
    let json_typed = src.content_type.as_deref().is_some_and(is_json_content_type);
    if json_typed {
        let parsed = (
            serde_json::from_str::<Value>(src.value_str()),
            serde_json::from_str::<Value>(dest.value_str()),
        );
        if let (Ok(a), Ok(b)) = parsed {
            return a == b;
        }
    }
    src.value == dest.value
}

/// Preview record for one key-value, trimmed to what `level` stores.
pub fn preview_record(kv: &KeyValue, level: CompareLevel) -> Value {
    match level {
        CompareLevel::File => json!({ "key": kv.key, "value": kv.value }),
        CompareLevel::AppService => {
            let mut record = Map::new();
            record.insert("key".into(), json!(kv.key));
            record.insert("value".into(), json!(kv.value));
            if let Some(slot) = kv.tags.get(APPSVC_SLOT_SETTING_TAG) {
                record.insert(APPSVC_SLOT_SETTING_TAG.into(), json!(slot));
            }
            Value::Object(record)
        }
        CompareLevel::AppConfig | CompareLevel::KvSet => json!({
            "key": kv.key,
            "label": kv.label,
            "value": kv.value,
            "content_type": kv.content_type,
            "tags": kv.tags,
        }),
        CompareLevel::Restore => json!({
            "key": kv.key,
            "label": kv.label,
            "value": kv.value,
            "content_type": kv.content_type,
            "locked": kv.locked,
            "tags": kv.tags,
        }),
    }
}

/// Text of the preview for `diff`, or `None` when nothing would change.
pub fn render_preview(
    diff: &KvDiff,
    source_empty: bool,
    level: CompareLevel,
    strict: bool,
    title: &str,
) -> (String, bool) {
    let mut out = format!("\n---------------- {} Preview ----------------\n", title);

    if source_empty && !strict {
        out.push_str("\nSource configuration is empty. No changes will be made.\n");
        return (out, false);
    }
    if diff.is_empty() {
        out.push_str(
            "\nTarget configuration already contains all configuration settings in source. \
             No changes will be made.\n",
        );
        return (out, false);
    }

    if !diff.delete.is_empty() {
        out.push_str("\nDeleting:\n");
        for kv in &diff.delete {
            out.push_str(&format!("{}\n", preview_record(kv, level)));
        }
    }
    if !diff.add.is_empty() {
        out.push_str("\nAdding:\n");
        for kv in &diff.add {
            out.push_str(&format!("{}\n", preview_record(kv, level)));
        }
    }
    if !diff.update.is_empty() {
        out.push_str("\nUpdating:\n");
        for update in &diff.update {
            out.push_str(&format!("- {}\n", preview_record(&update.old, level)));
            out.push_str(&format!("+ {}\n", preview_record(&update.new, level)));
        }
    }
    out.push('\n');
    (out, true)
}

/// Print the preview to stderr and report whether anything would change.
pub fn print_preview(
    diff: &KvDiff,
    source_empty: bool,
    level: CompareLevel,
    strict: bool,
    title: &str,
) -> bool {
    let (text, changes) = render_preview(diff, source_empty, level, strict, title);
    eprint!("{}", text);
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue::new(key, value)
    }

    #[test]
    fn test_add_update_and_skip() {
        let src = vec![kv("a", "1"), kv("b", "2"), kv("c", "3")];
        let dest = vec![kv("a", "1"), kv("b", "changed"), kv("z", "9")];
        let diff = KvComparer::new(src, CompareLevel::AppConfig).compare(&dest, false, true);

        assert_eq!(diff.add, vec![kv("c", "3")]);
        assert_eq!(diff.update.len(), 1);
        assert_eq!(diff.update[0].new.key, "b");
        assert_eq!(diff.update[0].old.value.as_deref(), Some("changed"));
        assert!(diff.delete.is_empty());
    }

    #[test]
    fn test_labels_are_part_of_identity() {
        let src = vec![kv("a", "1").with_label(Some("prod"))];
        let dest = vec![kv("a", "1")];
        let diff = KvComparer::new(src, CompareLevel::AppConfig).compare(&dest, true, true);
        assert_eq!(diff.add.len(), 1);
        assert_eq!(diff.delete, vec![kv("a", "1")]);
    }

    #[test]
    fn test_self_diff_is_empty() {
        let set = vec![
            kv("a", "1").with_content_type("text/plain"),
            kv("b", r#"{"x": 1}"#).with_content_type("application/json"),
            kv("c", "3").with_label(Some("dev")),
        ];
        for strict in [false, true] {
            let diff = KvComparer::new(set.clone(), CompareLevel::KvSet).compare(&set, strict, true);
            assert!(diff.is_empty(), "strict={}", strict);
        }
    }

    #[test]
    fn test_strict_against_empty_destination_adds_everything() {
        let src = vec![kv("a", "1"), kv("b", "2")];
        let diff = KvComparer::new(src.clone(), CompareLevel::KvSet).compare(&[], true, true);
        assert_eq!(diff.add, src);
        assert!(diff.update.is_empty());
        assert!(diff.delete.is_empty());
    }

    #[test]
    fn test_json_values_compare_structurally() {
        let src = vec![kv("a", r#"{"x":1,"y":[1,2]}"#).with_content_type("application/json")];
        let dest = vec![kv("a", "{ \"y\": [1, 2],\n \"x\": 1 }").with_content_type("application/json")];
        let diff = KvComparer::new(src, CompareLevel::AppConfig).compare(&dest, false, true);
        assert!(diff.is_empty());

        let text_src = vec![kv("a", r#"{"x":1}"#)];
        let text_dest = vec![kv("a", r#"{ "x": 1 }"#)];
        let diff = KvComparer::new(text_src, CompareLevel::File).compare(&text_dest, false, true);
        assert_eq!(diff.update.len(), 1);
    }

    #[test]
    fn test_tags_ignored_for_files() {
        let mut tagged = kv("a", "1");
        tagged.tags.insert("t".into(), "v".into());
        let diff = KvComparer::new(vec![tagged.clone()], CompareLevel::File)
            .compare(&[kv("a", "1")], false, true);
        assert!(diff.is_empty());
        let diff = KvComparer::new(vec![tagged], CompareLevel::AppConfig)
            .compare(&[kv("a", "1")], false, true);
        assert_eq!(diff.update.len(), 1);
    }

    #[test]
    fn test_matching_entries_rewritten_when_not_ignored() {
        let set = vec![kv("a", "1")];
        let diff = KvComparer::new(set.clone(), CompareLevel::AppConfig).compare(&set, false, false);
        assert_eq!(diff.update.len(), 1);
        assert_eq!(diff.writes().count(), 1);
    }

    #[test]
    fn test_preview_text() {
        let diff = KvDiff {
            add: vec![kv("new", "1")],
            update: vec![KvUpdate {
                new: kv("k", "2"),
                old: kv("k", "1"),
            }],
            delete: vec![],
        };
        let (text, changed) = render_preview(&diff, false, CompareLevel::File, false, "Key Values");
        assert!(changed);
        assert!(text.contains("Key Values Preview"));
        assert!(text.contains("Adding:\n{\"key\":\"new\",\"value\":\"1\"}"));
        assert!(text.contains("- {\"key\":\"k\",\"value\":\"1\"}"));
        assert!(text.contains("+ {\"key\":\"k\",\"value\":\"2\"}"));
        assert!(!text.contains("Deleting:"));

        let (text, changed) =
            render_preview(&KvDiff::default(), true, CompareLevel::File, false, "Key Values");
        assert!(!changed);
        assert!(text.contains("Source configuration is empty"));
    }
}
