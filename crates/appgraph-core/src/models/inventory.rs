//! Source inventory: the per-file facts produced by the upstream extractors.
//!
//! Every file carries at most one typed detail record. The detail is a closed
//! tagged union so the few places that branch on it match exhaustively.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{LinkerError, LinkerResult};
use crate::normalize::normalize_path;

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SourceInventory {
    pub project_name: String,
    #[serde(default)]
    pub project_root: Option<String>,
    #[serde(default)]
    pub files: Vec<SourceFile>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub detail: Option<FileDetail>,
    /// Set by the upstream extractor when it failed on this file.
    #[serde(default)]
    pub parse_error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileDetail {
    Config(ConfigDetail),
    Java(JavaDetail),
    Jsp(JspDetail),
    Sql(SqlDetail),
}

impl SourceInventory {
    /// Parse an inventory document. A JSON `null` is a missing inventory;
    /// any other non-object top level is invalid input.
    pub fn from_json(raw: &str) -> LinkerResult<Self> {
        match serde_json::from_str::<serde_json::Value>(raw)? {
            serde_json::Value::Null => Err(LinkerError::MissingInventory),
            value @ serde_json::Value::Object(_) => Ok(serde_json::from_value(value)?),
            other => Err(LinkerError::not_an_object("inventory", &other)),
        }
    }

    pub fn from_path(path: &Path) -> LinkerResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// A copy of this inventory with every file path in canonical
    /// project-relative form.
    pub fn normalized(&self) -> SourceInventory {
        let root = self.project_root.as_deref();
        SourceInventory {
            project_name: self.project_name.clone(),
            project_root: self.project_root.clone(),
            files: self
                .files
                .iter()
                .map(|f| SourceFile {
                    path: normalize_path(&f.path, root),
                    ..f.clone()
                })
                .collect(),
        }
    }

    /// Paths of every JSP page, in inventory order.
    pub fn jsp_paths(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|f| f.is_jsp())
            .map(|f| f.path.as_str())
            .collect()
    }
}

impl SourceFile {
    pub fn is_jsp(&self) -> bool {
        if matches!(self.detail, Some(FileDetail::Jsp(_))) {
            return true;
        }
        let lower = self.path.to_lowercase();
        lower.ends_with(".jsp") || lower.ends_with(".jspx") || lower.ends_with(".jspf")
    }
}

// ---------------------------------------------------------------------------
// Configuration mappings (struts-config.xml, struts.xml, web.xml)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDetail {
    pub action_mappings: Vec<ActionMapping>,
    /// Struts 2 `<package>` blocks.
    pub mapping_groups: Vec<MappingGroup>,
    pub servlet_mappings: Vec<ServletMapping>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionMapping {
    pub path: Option<String>,
    pub namespace: Option<String>,
    #[serde(alias = "type", alias = "class")]
    pub action_class: Option<String>,
    pub method: Option<String>,
    pub forwards: Vec<Forward>,
    pub line: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Forward {
    pub name: Option<String>,
    pub path: String,
    pub line: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingGroup {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub mappings: Vec<ActionMapping>,
    pub line: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServletMapping {
    pub servlet_name: Option<String>,
    pub url_pattern: Option<String>,
    pub servlet_class: Option<String>,
    pub line: Option<u32>,
}

// ---------------------------------------------------------------------------
// Java
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JavaDetail {
    pub package: Option<String>,
    pub classes: Vec<JavaClass>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JavaClass {
    pub name: String,
    pub fqcn: Option<String>,
    pub annotations: Vec<Annotation>,
    pub methods: Vec<JavaMethod>,
    pub line: Option<u32>,
    pub end_line: Option<u32>,
}

impl JavaClass {
    /// Fully-qualified class name, falling back to `package.Name`.
    pub fn qualified_name(&self, package: Option<&str>) -> String {
        if let Some(fqcn) = self.fqcn.as_deref().filter(|s| !s.trim().is_empty()) {
            return fqcn.trim().to_string();
        }
        match package.map(str::trim).filter(|p| !p.is_empty()) {
            Some(pkg) => format!("{pkg}.{}", self.name.trim()),
            None => self.name.trim().to_string(),
        }
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&JavaMethod> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JavaMethod {
    pub name: String,
    pub annotations: Vec<Annotation>,
    pub sql_statements: Vec<SqlStatement>,
    pub procedure_calls: Vec<ProcedureCall>,
    pub line: Option<u32>,
    pub end_line: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Annotation {
    pub name: String,
    pub attributes: BTreeMap<String, AnnotationValue>,
    pub line: Option<u32>,
}

impl Annotation {
    /// Annotation name without its package qualifier.
    pub fn simple_name(&self) -> &str {
        let trimmed = self.name.trim().trim_start_matches('@');
        trimmed.rsplit('.').next().unwrap_or(trimmed)
    }

    pub fn values(&self, attribute: &str) -> Vec<&str> {
        match self.attributes.get(attribute) {
            Some(value) => value.values(),
            None => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnnotationValue {
    List(Vec<String>),
    Scalar(String),
}

impl AnnotationValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            AnnotationValue::List(items) => items.iter().map(String::as_str).collect(),
            AnnotationValue::Scalar(item) => vec![item.as_str()],
        }
    }
}

// ---------------------------------------------------------------------------
// JSP
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JspDetail {
    pub tags: Vec<JspTag>,
    pub el_expressions: Vec<ElExpression>,
    pub scriptlets: Vec<Scriptlet>,
    pub code_mappings: Vec<CodeMapping>,
    /// Includes recorded separately from code mappings (`<%@ include %>`).
    pub includes: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JspTag {
    pub prefix: Option<String>,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
    pub line: Option<u32>,
    pub end_line: Option<u32>,
}

impl JspTag {
    /// Split `prefix:name` when the extractor kept the prefix in the name.
    pub fn prefix_and_name(&self) -> (Option<&str>, &str) {
        if let Some(prefix) = self.prefix.as_deref().filter(|p| !p.is_empty()) {
            return (Some(prefix), self.name.as_str());
        }
        match self.name.split_once(':') {
            Some((prefix, name)) => (Some(prefix), name),
            None => (None, self.name.as_str()),
        }
    }

    /// Full text for pattern scanning; reconstructed from attributes when the
    /// extractor did not keep it.
    pub fn full_text(&self) -> String {
        if let Some(text) = &self.text {
            return text.clone();
        }
        let attrs: Vec<String> = self
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}=\"{v}\""))
            .collect();
        format!("<{} {}>", self.name, attrs.join(" "))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ElExpression {
    pub expression: String,
    pub line: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scriptlet {
    pub code: String,
    pub line: Option<u32>,
    pub end_line: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeMapping {
    pub kind: MappingKind,
    pub from_reference: Option<String>,
    pub to_reference: Option<String>,
    pub line: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    JspInclude,
    Iframe,
    Redirect,
    ActionCall,
    JspSecurity,
    #[default]
    #[serde(other)]
    Other,
}

// ---------------------------------------------------------------------------
// SQL
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlDetail {
    pub statements: Vec<SqlStatement>,
    pub objects: Vec<DbObject>,
    pub table_operations: Vec<TableOperation>,
    pub procedure_calls: Vec<ProcedureCall>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlStatement {
    pub statement_type: String,
    pub tables: Vec<String>,
    pub text: Option<String>,
    pub line: Option<u32>,
    pub end_line: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbObject {
    pub object_type: String,
    pub name: String,
    pub schema: Option<String>,
    pub line: Option<u32>,
}

impl DbObject {
    pub fn is_procedure(&self) -> bool {
        matches!(
            self.object_type.trim().to_lowercase().as_str(),
            "procedure" | "proc" | "stored_procedure" | "storedprocedure"
        )
    }

    pub fn is_table_like(&self) -> bool {
        matches!(
            self.object_type.trim().to_lowercase().as_str(),
            "table" | "view"
        )
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOperation {
    pub table: String,
    pub operation: String,
    pub line: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcedureCall {
    pub name: String,
    pub line: Option<u32>,
}
