//! Plugin parameter schemas parsed from `slicer_cli_web` XML descriptors.
//!
//! A descriptor is a Slicer execution-model document:
//!
//! ```xml
//! <executable>
//!   <title>Nuclei Segmentation</title>
//!   <parameters advanced="false">
//!     <label>IO</label>
//!     <image><name>inputImageFile</name><label>Input Image</label><channel>input</channel></image>
//!     <double><name>threshold</name><default>0.5</default>
//!       <constraints><minimum>0</minimum><maximum>1</maximum><step>0.1</step></constraints>
//!     </double>
//!   </parameters>
//! </executable>
//! ```

use std::fmt;

use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::{
    CLI_PATH,
    client::{GirderApi, token_query},
    errors::{Error, Result},
};

/// The parameter kinds a descriptor can declare. Any other tag inside a
/// `<parameters>` group is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterType {
    Integer,
    Float,
    Double,
    Boolean,
    String,
    IntegerVector,
    FloatVector,
    DoubleVector,
    StringVector,
    IntegerEnumeration,
    FloatEnumeration,
    DoubleEnumeration,
    StringEnumeration,
    File,
    Directory,
    Image,
    Geometry,
    Point,
    Pointfile,
    Region,
    Table,
    Transform,
}

impl ParameterType {
    pub const ALL: [ParameterType; 22] = [
        ParameterType::Integer,
        ParameterType::Float,
        ParameterType::Double,
        ParameterType::Boolean,
        ParameterType::String,
        ParameterType::IntegerVector,
        ParameterType::FloatVector,
        ParameterType::DoubleVector,
        ParameterType::StringVector,
        ParameterType::IntegerEnumeration,
        ParameterType::FloatEnumeration,
        ParameterType::DoubleEnumeration,
        ParameterType::StringEnumeration,
        ParameterType::File,
        ParameterType::Directory,
        ParameterType::Image,
        ParameterType::Geometry,
        ParameterType::Point,
        ParameterType::Pointfile,
        ParameterType::Region,
        ParameterType::Table,
        ParameterType::Transform,
    ];

    /// The XML tag for this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            ParameterType::Integer => "integer",
            ParameterType::Float => "float",
            ParameterType::Double => "double",
            ParameterType::Boolean => "boolean",
            ParameterType::String => "string",
            ParameterType::IntegerVector => "integer-vector",
            ParameterType::FloatVector => "float-vector",
            ParameterType::DoubleVector => "double-vector",
            ParameterType::StringVector => "string-vector",
            ParameterType::IntegerEnumeration => "integer-enumeration",
            ParameterType::FloatEnumeration => "float-enumeration",
            ParameterType::DoubleEnumeration => "double-enumeration",
            ParameterType::StringEnumeration => "string-enumeration",
            ParameterType::File => "file",
            ParameterType::Directory => "directory",
            ParameterType::Image => "image",
            ParameterType::Geometry => "geometry",
            ParameterType::Point => "point",
            ParameterType::Pointfile => "pointfile",
            ParameterType::Region => "region",
            ParameterType::Table => "table",
            ParameterType::Transform => "transform",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.tag() == tag)
    }

    pub fn is_enumeration(&self) -> bool {
        matches!(
            self,
            ParameterType::IntegerEnumeration
                | ParameterType::FloatEnumeration
                | ParameterType::DoubleEnumeration
                | ParameterType::StringEnumeration
        )
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Numeric bounds declared in a `<constraints>` element, kept as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    pub min: Option<String>,
    pub max: Option<String>,
    pub step: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInput {
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub label: Option<String>,
    pub name: Option<String>,
    pub channel: Option<String>,
    pub description: Option<String>,
    pub default: Option<String>,
    /// Ordered choices, present only for enumeration kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
    /// Position of a positional (index-addressed) argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longflag: Option<String>,
    #[serde(default)]
    pub multiple: bool,
}

impl ParameterInput {
    /// Identity key: the name when declared, otherwise the label.
    pub fn identity(&self) -> Option<&str> {
        self.name.as_deref().or(self.label.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterGroup {
    pub advanced: bool,
    pub label: Option<String>,
    pub description: Option<String>,
    pub inputs: Vec<ParameterInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSchema {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub documentation_url: Option<String>,
    pub parameter_groups: Vec<ParameterGroup>,
}

impl PluginSchema {
    /// Every declared input, in schema order.
    pub fn inputs(&self) -> impl Iterator<Item = &ParameterInput> {
        self.parameter_groups.iter().flat_map(|g| g.inputs.iter())
    }

    pub fn find_input(&self, name: &str) -> Option<&ParameterInput> {
        self.inputs().find(|i| i.name.as_deref() == Some(name))
    }

    /// Identities of all declared inputs (name, else label).
    pub fn required_identities(&self) -> Vec<String> {
        self.inputs()
            .filter_map(|i| i.identity().map(str::to_string))
            .collect()
    }

    /// `(identity, default)` for every input that declares a default.
    pub fn defaults(&self) -> Vec<(String, String)> {
        self.inputs()
            .filter_map(|i| Some((i.identity()?.to_string(), i.default.clone()?)))
            .collect()
    }

    /// Parse a descriptor document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml).map_err(|err| Error::Descriptor(err.to_string()))?;
        let root = doc.root_element();

        let parameter_groups = root
            .children()
            .filter(|n| n.has_tag_name("parameters"))
            .map(parse_group)
            .collect();

        Ok(PluginSchema {
            title: child_text(root, "title"),
            description: child_text(root, "description"),
            author: child_text(root, "contributor"),
            documentation_url: child_text(root, "documentation-url"),
            parameter_groups,
        })
    }
}

fn parse_group(node: Node<'_, '_>) -> ParameterGroup {
    let advanced = node
        .attribute("advanced")
        .map(str::to_string)
        .or_else(|| child_text(node, "advanced"))
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let inputs = node
        .children()
        .filter(|n| n.is_element())
        .filter_map(|n| ParameterType::from_tag(n.tag_name().name()).map(|t| parse_input(n, t)))
        .collect();

    ParameterGroup {
        advanced,
        label: child_text(node, "label"),
        description: child_text(node, "description"),
        inputs,
    }
}

fn parse_input(node: Node<'_, '_>, param_type: ParameterType) -> ParameterInput {
    let options = param_type.is_enumeration().then(|| {
        node.children()
            .filter(|n| n.has_tag_name("element"))
            .filter_map(element_text)
            .collect()
    });

    let constraints = child(node, "constraints").map(|c| Constraints {
        min: child_text(c, "minimum").or_else(|| child_text(c, "min")),
        max: child_text(c, "maximum").or_else(|| child_text(c, "max")),
        step: child_text(c, "step"),
    });

    ParameterInput {
        param_type,
        label: child_text(node, "label"),
        name: child_text(node, "name"),
        channel: child_text(node, "channel"),
        description: child_text(node, "description"),
        default: child_text(node, "default"),
        options,
        constraints,
        index: child_text(node, "index").and_then(|v| v.parse().ok()),
        flag: child_text(node, "flag"),
        longflag: child_text(node, "longflag"),
        multiple: node
            .attribute("multiple")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
    }
}

fn child<'a, 'i>(node: Node<'a, 'i>, tag: &str) -> Option<Node<'a, 'i>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    child(node, tag).and_then(element_text)
}

/// Text content of an element; empty elements count as absent.
fn element_text(node: Node<'_, '_>) -> Option<String> {
    node.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Deserialize)]
struct PluginListing {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Find the id of the plugin built from `docker_image` that exposes `cli`.
pub fn resolve_plugin_id(api: &dyn GirderApi, docker_image: &str, cli: &str) -> Result<Option<String>> {
    let plugins: Vec<PluginListing> = api.get(CLI_PATH, &[])?.into_json()?;
    let found = plugins.into_iter().find(|p| {
        p.image.as_deref() == Some(docker_image) && p.name.as_deref() == Some(cli)
    });

    #[cfg(feature = "tracing")]
    if found.is_none() {
        tracing::warn!(docker_image, cli, "no plugin matches image and cli name");
    }

    Ok(found.map(|p| p.id))
}

/// Fetch and parse the descriptor for `plugin_id`.
///
/// A non-success descriptor response is `Ok(None)`; transport failures and
/// unparseable descriptors are errors.
pub fn fetch_schema(api: &dyn GirderApi, plugin_id: &str) -> Result<Option<PluginSchema>> {
    let path = format!("{CLI_PATH}/{plugin_id}/xml");
    let resp = api.get(&path, &token_query(api))?;
    if !resp.is_success() {
        #[cfg(feature = "tracing")]
        tracing::warn!(plugin_id, status = resp.status, body = %resp.body, "descriptor fetch failed");
        return Ok(None);
    }
    PluginSchema::from_xml(&resp.body).map(Some)
}

/// How a job names its plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginRef {
    Id(String),
    Image { docker_image: String, cli: String },
}

impl fmt::Display for PluginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginRef::Id(id) => write!(f, "{id}"),
            PluginRef::Image { docker_image, cli } => write!(f, "{docker_image}#{cli}"),
        }
    }
}

/// A plugin id together with its parsed schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlugin {
    pub id: String,
    pub schema: PluginSchema,
}

/// Resolve a plugin reference to its id and schema. `Ok(None)` when the
/// plugin cannot be found or its descriptor cannot be fetched.
pub fn resolve_plugin(api: &dyn GirderApi, plugin: &PluginRef) -> Result<Option<ResolvedPlugin>> {
    let id = match plugin {
        PluginRef::Id(id) => Some(id.clone()),
        PluginRef::Image { docker_image, cli } => resolve_plugin_id(api, docker_image, cli)?,
    };
    let Some(id) = id else {
        return Ok(None);
    };
    Ok(fetch_schema(api, &id)?.map(|schema| ResolvedPlugin { id, schema }))
}
