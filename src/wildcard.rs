//! Wildcard references: argument values that name a Girder resource by path
//! or name instead of by id, resolved against the server before submission.
//!
//! ```text
//! {{'type':'file','item_type':'path','item_query':'/collection/slides/a.svs','file_type':'fileName','file_query':'a.svs'}}
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::{
    binder::ArgumentValue,
    client::{GirderApi, query},
    errors::{Error, Result},
};

/// Whether a string value is a wildcard candidate.
pub fn is_wildcard(value: &str) -> bool {
    value.contains("{{")
}

/// How an item or folder is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Lookup {
    #[serde(rename = "path")]
    Path,
    #[serde(rename = "_id")]
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FileLookup {
    #[serde(rename = "fileName")]
    Name,
    #[serde(rename = "_id")]
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum AnnotationLookup {
    #[serde(rename = "annotationName")]
    Name,
    #[serde(rename = "annotationId")]
    Id,
}

/// A parsed wildcard reference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WildcardRef {
    Item {
        item_type: Lookup,
        item_query: String,
    },
    Folder {
        folder_type: Lookup,
        folder_query: String,
    },
    File {
        item_type: Lookup,
        item_query: String,
        file_type: FileLookup,
        file_query: String,
    },
    Annotation {
        item_type: Lookup,
        item_query: String,
        annotation_type: AnnotationLookup,
        #[serde(alias = "anotation_query")]
        annotation_query: String,
    },
}

impl WildcardRef {
    /// Parse `{{ ... }}`. The body may be strict JSON or use single quotes.
    ///
    /// Single quotes are only treated as delimiters next to JSON structure,
    /// so apostrophes inside values (`/user/O'Brien/slide.svs`) are kept.
    pub fn parse(raw: &str) -> Result<Self> {
        let inner = raw
            .trim()
            .strip_prefix("{{")
            .and_then(|s| s.strip_suffix("}}"))
            .map(str::trim)
            .ok_or_else(|| malformed(raw, "expected a value wrapped in {{ }}"))?;

        // Both `{{"type": ...}}` and `{{ {"type": ...} }}` are accepted.
        let object = if inner.starts_with('{') && inner.ends_with('}') {
            inner.to_string()
        } else {
            format!("{{{inner}}}")
        };

        serde_json::from_str(&object)
            .or_else(|_| serde_json::from_str(&single_to_double_quotes(&object)))
            .map_err(|err| malformed(raw, err))
    }

    /// Resolve to a concrete Girder id.
    pub fn resolve(&self, api: &dyn GirderApi) -> Result<String> {
        match self {
            WildcardRef::Item {
                item_type,
                item_query,
            } => locate(api, *item_type, item_query),
            WildcardRef::Folder {
                folder_type,
                folder_query,
            } => locate(api, *folder_type, folder_query),
            WildcardRef::File {
                item_type,
                item_query,
                file_type,
                file_query,
            } => match file_type {
                FileLookup::Id => Ok(file_query.clone()),
                FileLookup::Name => {
                    let item_id = locate(api, *item_type, item_query)?;
                    find_file(api, &item_id, file_query)
                }
            },
            WildcardRef::Annotation {
                item_type,
                item_query,
                annotation_type,
                annotation_query,
            } => match annotation_type {
                AnnotationLookup::Id => Ok(annotation_query.clone()),
                AnnotationLookup::Name => {
                    let item_id = locate(api, *item_type, item_query)?;
                    find_annotation(api, &item_id, annotation_query)
                }
            },
        }
    }
}

/// Swap `'` for `"` where it delimits a key or string: next to `{ } [ ] : ,`
/// or at either end of the text.
fn single_to_double_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let structural = |c: Option<&char>| matches!(c, None | Some('{' | '}' | '[' | ']' | ':' | ','));
    chars
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            if c != '\'' {
                return c;
            }
            let before = chars[..i].iter().rev().find(|c| !c.is_whitespace());
            let after = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if structural(before) || structural(after) {
                '"'
            } else {
                c
            }
        })
        .collect()
}

fn malformed(raw: &str, message: impl ToString) -> Error {
    Error::MalformedReference {
        raw: raw.to_string(),
        message: message.to_string(),
    }
}

#[derive(Deserialize)]
struct Resource {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Deserialize)]
struct NamedResource {
    #[serde(rename = "_id")]
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct AnnotationResource {
    #[serde(rename = "_id")]
    id: String,
    annotation: AnnotationBody,
}

#[derive(Deserialize)]
struct AnnotationBody {
    #[serde(default)]
    name: Option<String>,
}

fn locate(api: &dyn GirderApi, lookup: Lookup, query_value: &str) -> Result<String> {
    match lookup {
        Lookup::Id => Ok(query_value.to_string()),
        Lookup::Path => {
            let resp = api.get("resource/lookup", &query([("path", query_value)]))?;
            // Girder answers an unknown path with 400 "Path not found".
            if resp.status == 400 || resp.status == 404 {
                return Err(Error::ReferenceNotFound {
                    kind: "path",
                    query: query_value.to_string(),
                });
            }
            let resource: Resource = resp.into_json()?;
            Ok(resource.id)
        }
    }
}

fn find_file(api: &dyn GirderApi, item_id: &str, name: &str) -> Result<String> {
    let files: Vec<NamedResource> = api
        .get(&format!("item/{item_id}/files"), &query([("limit", "0")]))?
        .into_json()?;
    files
        .into_iter()
        .find(|f| f.name == name)
        .map(|f| f.id)
        .ok_or_else(|| Error::ReferenceNotFound {
            kind: "file",
            query: name.to_string(),
        })
}

fn find_annotation(api: &dyn GirderApi, item_id: &str, name: &str) -> Result<String> {
    let annotations: Vec<AnnotationResource> = api
        .get("annotation", &query([("itemId", item_id), ("limit", "0")]))?
        .into_json()?;
    annotations
        .into_iter()
        .find(|a| a.annotation.name.as_deref() == Some(name))
        .map(|a| a.id)
        .ok_or_else(|| Error::ReferenceNotFound {
            kind: "annotation",
            query: name.to_string(),
        })
}

/// Resolve a single argument value; anything that is not a wildcard string is returned as is.
pub fn resolve_value(api: &dyn GirderApi, value: &Value) -> Result<Value> {
    match value {
        Value::String(s) if is_wildcard(s) => {
            let id = WildcardRef::parse(s)?.resolve(api)?;
            #[cfg(feature = "tracing")]
            tracing::debug!(reference = %s, id = %id, "resolved wildcard reference");
            Ok(Value::String(id))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve every wildcard in `args`. The first failing lookup aborts.
pub fn resolve_arguments(api: &dyn GirderApi, args: &[ArgumentValue]) -> Result<Vec<ArgumentValue>> {
    args.iter()
        .map(|arg| {
            Ok(ArgumentValue {
                name: arg.name.clone(),
                value: resolve_value(api, &arg.value)?,
            })
        })
        .collect()
}
