//! Merge caller arguments over schema defaults into the parameter set sent
//! with a run request.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    API_URL_PARAM, TOKEN_PARAM,
    client::{GirderApi, Query},
    errors::{Error, Result},
    schema::PluginSchema,
};

/// A caller-supplied argument. `value` may be a wildcard reference string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentValue {
    pub name: String,
    pub value: Value,
}

impl ArgumentValue {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One bound parameter. Label-only inputs have no name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedParameter {
    pub name: Option<String>,
    pub value: Value,
}

/// What to do about missing required inputs before submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputValidation {
    /// Record and log missing inputs, submit anyway.
    #[default]
    Report,
    /// Refuse to submit when an input is absent or bound to null.
    Strict,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParameterSet {
    entries: Vec<ResolvedParameter>,
    provided: Vec<String>,
    missing: Vec<String>,
}

impl ResolvedParameterSet {
    /// Bind `args` (already wildcard-resolved) against `schema`.
    ///
    /// Inputs without a name keep their schema default: they cannot be
    /// addressed by a caller argument.
    pub fn bind(schema: &PluginSchema, args: &[ArgumentValue], api: &dyn GirderApi) -> Self {
        let mut entries = Vec::new();
        let mut provided: Vec<String> = Vec::new();

        for input in schema.inputs() {
            let default = input.default.clone().map(Value::String).unwrap_or(Value::Null);
            match &input.name {
                Some(name) => {
                    let value = args
                        .iter()
                        .find(|a| &a.name == name)
                        .map(|a| a.value.clone())
                        .unwrap_or(default);
                    entries.push(ResolvedParameter {
                        name: Some(name.clone()),
                        value,
                    });
                    provided.push(name.clone());
                }
                None => {
                    entries.push(ResolvedParameter {
                        name: None,
                        value: default,
                    });
                    if let Some(label) = &input.label {
                        provided.push(label.clone());
                    }
                }
            }
        }

        let declared: HashSet<&str> = provided.iter().map(String::as_str).collect();
        let extras: Vec<ResolvedParameter> = args
            .iter()
            .filter(|a| !declared.contains(a.name.as_str()))
            .map(|a| ResolvedParameter {
                name: Some(a.name.clone()),
                value: a.value.clone(),
            })
            .collect();
        for extra in extras {
            if let Some(name) = &extra.name {
                provided.push(name.clone());
            }
            entries.push(extra);
        }

        for (name, value) in [(API_URL_PARAM, api.api_url()), (TOKEN_PARAM, api.token())] {
            entries.push(ResolvedParameter {
                name: Some(name.to_string()),
                value: Value::String(value.to_string()),
            });
            provided.push(name.to_string());
        }

        let missing: Vec<String> = schema
            .required_identities()
            .into_iter()
            .filter(|id| !provided.contains(id))
            .collect();

        #[cfg(feature = "tracing")]
        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, provided = ?provided, "missing required inputs");
        }

        Self {
            entries,
            provided,
            missing,
        }
    }

    /// Entries in bind order.
    pub fn entries(&self) -> &[ResolvedParameter] {
        &self.entries
    }

    /// Identities (name, else label) that were bound.
    pub fn provided(&self) -> &[String] {
        &self.provided
    }

    /// Required identities that never appeared in the bound set.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// First value bound under `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|e| e.name.as_deref() == Some(name))
            .map(|e| &e.value)
    }

    /// Named entries whose value is null.
    pub fn null_valued(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.value.is_null())
            .filter_map(|e| e.name.clone())
            .collect()
    }

    /// Apply `mode`. Strict mode also counts null-valued inputs as missing.
    pub fn validate(&self, mode: InputValidation) -> Result<()> {
        if mode == InputValidation::Report {
            return Ok(());
        }
        let mut missing = self.missing.clone();
        for name in self.null_valued() {
            if !missing.contains(&name) {
                missing.push(name);
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingInputs(missing))
        }
    }

    /// Query-string form for the run request. Unnamed and null entries are
    /// dropped; a repeated name keeps its first position and its last value.
    pub fn to_query(&self) -> Query {
        let mut out: Query = Vec::new();
        for entry in &self.entries {
            let Some(name) = &entry.name else {
                continue;
            };
            let Some(encoded) = encode_value(&entry.value) else {
                continue;
            };
            match out.iter_mut().find(|(k, _)| k == name) {
                Some(slot) => slot.1 = encoded,
                None => out.push((name.clone(), encoded)),
            }
        }
        out
    }
}

fn encode_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
