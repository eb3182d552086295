//! Stage 2: move templates with a declared non-info severity out of the
//! unique collection.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::de::{self, Deserialize, Deserializer, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::{info, warn};

use crate::error::{IoContext, Result};
use crate::fsops::{move_file, template_entries};

/// Severity level retained by the pipeline.
pub const RETAINED_SEVERITY: &str = "info";

/// What a template says about its `info.severity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    /// Lowercased declared value
    Declared(String),
    /// No `info.severity`, or an empty/null one
    Missing,
    /// The document could not be read or is not shaped like a template
    Unparseable(String),
}

impl Severity {
    pub fn parse(content: &str) -> Severity {
        let doc = match serde_yaml::from_str::<LastKeyWins>(content) {
            Ok(LastKeyWins(doc)) => doc,
            Err(e) => return Severity::Unparseable(e.to_string()),
        };

        let Some(root) = doc.as_mapping() else {
            return Severity::Unparseable("document is not a mapping".to_string());
        };
        let info = match root.get("info") {
            None => return Severity::Missing,
            Some(Value::Mapping(info)) => info,
            Some(_) => return Severity::Unparseable("`info` is not a mapping".to_string()),
        };

        match info.get("severity") {
            None | Some(Value::Null) => Severity::Missing,
            Some(Value::String(s)) if s.is_empty() => Severity::Missing,
            Some(Value::String(s)) => Severity::Declared(s.to_lowercase()),
            Some(_) => Severity::Unparseable("`info.severity` is not a string".to_string()),
        }
    }

    pub fn of_file(path: &Path) -> Severity {
        match fs::read_to_string(path) {
            Ok(content) => Severity::parse(&content),
            Err(e) => Severity::Unparseable(e.to_string()),
        }
    }

    /// Only a declared, non-info severity leaves the collection.
    pub fn is_retained(&self) -> bool {
        match self {
            Severity::Declared(level) => level == RETAINED_SEVERITY,
            Severity::Missing | Severity::Unparseable(_) => true,
        }
    }
}

/// A YAML value where a repeated mapping key keeps its last value instead of
/// failing the whole document. Scraped templates often repeat keys.
struct LastKeyWins(Value);

impl<'de> Deserialize<'de> for LastKeyWins {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(LastKeyWinsVisitor)
    }
}

struct LastKeyWinsVisitor;

impl<'de> Visitor<'de> for LastKeyWinsVisitor {
    type Value = LastKeyWins;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any YAML value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<LastKeyWins, E> {
        Ok(LastKeyWins(Value::Bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<LastKeyWins, E> {
        Ok(LastKeyWins(Value::Number(v.into())))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<LastKeyWins, E> {
        Ok(LastKeyWins(Value::Number(v.into())))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<LastKeyWins, E> {
        Ok(LastKeyWins(Value::Number(v.into())))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<LastKeyWins, E> {
        Ok(LastKeyWins(Value::String(v.to_owned())))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<LastKeyWins, E> {
        Ok(LastKeyWins(Value::String(v)))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<LastKeyWins, E> {
        Ok(LastKeyWins(Value::Null))
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<LastKeyWins, E> {
        Ok(LastKeyWins(Value::Null))
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<LastKeyWins, D::Error> {
        LastKeyWins::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<LastKeyWins, A::Error> {
        let mut items = Vec::new();
        while let Some(LastKeyWins(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(LastKeyWins(Value::Sequence(items)))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<LastKeyWins, A::Error> {
        let mut mapping = Mapping::new();
        while let Some((LastKeyWins(key), LastKeyWins(value))) = map.next_entry()? {
            mapping.insert(key, value);
        }
        Ok(LastKeyWins(Value::Mapping(mapping)))
    }

    // Custom `!tag`s arrive as enums; the tag is dropped and the value kept.
    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> std::result::Result<LastKeyWins, A::Error> {
        let (_tag, variant): (String, _) = data.variant()?;
        variant.newtype_variant()
    }
}

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct SeverityReport {
    pub moved: usize,
    pub retained_info: usize,
    pub retained_missing: usize,
    pub retained_unparseable: usize,
    pub errors: usize,
}

/// Move every template in `source` whose severity is declared and not `info`
/// into `target`, keeping its file name. Everything else stays in `source`.
pub fn split_by_severity(source: &Path, target: &Path) -> Result<SeverityReport> {
    fs::create_dir_all(target).at(target)?;

    let mut report = SeverityReport::default();
    for path in template_entries(source)? {
        let severity = Severity::of_file(&path);
        if severity.is_retained() {
            match severity {
                Severity::Declared(_) => report.retained_info += 1,
                Severity::Missing => report.retained_missing += 1,
                Severity::Unparseable(reason) => {
                    report.retained_unparseable += 1;
                    warn!(path = %path.display(), error = %reason, "failed to read severity");
                }
            }
            continue;
        }

        let Some(name) = path.file_name() else { continue };
        let destination = target.join(name);
        match move_file(&path, &destination) {
            Ok(()) => {
                report.moved += 1;
                info!(
                    source = %path.display(),
                    destination = %destination.display(),
                    "moved non-info template"
                );
            }
            Err(e) => {
                report.errors += 1;
                warn!(path = %path.display(), error = %e, "failed to move template");
            }
        }
    }

    Ok(report)
}
