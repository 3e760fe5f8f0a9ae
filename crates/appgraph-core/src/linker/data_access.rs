//! Data access edges: CRUD relations and stored-procedure invocations.
//!
//! Phase A folds every SQL file into a [`ProcedureMap`] (procedure → table
//! operations plus the known-object index). Phase B expands per-file edges
//! and only ever reads the finished map.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;
use tracing::debug;

use crate::config::AssemblerConfig;
use crate::evidence::line_evidence;
use crate::linker::Contribution;
use crate::models::graph::{method_id, proc_id, table_id, CrudOp, Entity, Evidence, Relation, RelationType, SourceRef};
use crate::models::inventory::{FileDetail, JavaDetail, JspDetail, SourceFile, SourceInventory, SqlDetail};
use crate::normalize::{canonical_object_name, object_key, unqualified_name};

const INLINE_SQL_CONFIDENCE: f64 = 0.9;
const VIA_PROCEDURE_CONFIDENCE: f64 = 0.8;
const INVOKES_PROCEDURE_CONFIDENCE: f64 = 0.9;
const JSP_SQL_CONFIDENCE: f64 = 0.6;

const NAME: &str = r#"([\[\]"`\w.$#]+)"#;

static CREATE_PROC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:CREATE|ALTER)\s+(?:OR\s+REPLACE\s+)?PROC(?:EDURE)?\s+{NAME}")).unwrap()
});

static SELECT_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?is)\bSELECT\b.+?\bFROM\s+{NAME}")).unwrap());

static INSERT_INTO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\bINSERT\s+INTO\s+{NAME}")).unwrap());

static UPDATE_SET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\bUPDATE\s+{NAME}\s+SET\b")).unwrap());

static DELETE_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\bDELETE\s+FROM\s+{NAME}")).unwrap());

static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\{{\s*(?:\?\s*=\s*)?call\s+{NAME}")).unwrap());

static EXEC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\bEXEC(?:UTE)?\s+{NAME}")).unwrap());

static PREPARE_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)prepareCall\s*\(\s*"([^"]*)""#).unwrap());

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z_][\w.]*").unwrap());

static PROCEDURE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:get|load|update|delete|insert|create|save|report|validate|check|analyze|export|fetch|find|process)[A-Z_]|(?i:sp_|usp_|proc_))",
    )
    .unwrap()
});

const DDL_STATEMENTS: &[&str] = &["CREATE", "ALTER", "DROP", "GRANT", "REVOKE", "DECLARE", "SET"];

/// Verb-prefixed identifiers read as procedure names rather than tables.
pub fn looks_like_procedure(name: &str) -> bool {
    PROCEDURE_NAME_RE.is_match(&unqualified_name(name))
}

// ---------------------------------------------------------------------------
// Phase A: procedure map
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcedureEntry {
    /// Canonical `schema.name` as declared.
    pub canonical: String,
    pub operations: Vec<(CrudOp, String)>,
}

/// Procedures declared by one SQL file together with the file's operations.
#[derive(Debug, Default)]
struct SqlFileFacts {
    path: String,
    procedures: Vec<(String, Option<u32>)>,
    operations: Vec<(CrudOp, String)>,
    tables: Vec<(String, String, Option<u32>)>,
}

fn declared_procedures(detail: &SqlDetail) -> Vec<(String, Option<u32>)> {
    let mut out: Vec<(String, Option<u32>)> = Vec::new();
    let mut push = |raw: &str, line: Option<u32>| {
        let canonical = canonical_object_name(raw);
        if !canonical.is_empty() && !out.iter().any(|(c, _)| c.eq_ignore_ascii_case(&canonical)) {
            out.push((canonical, line));
        }
    };
    for object in detail.objects.iter().filter(|o| o.is_procedure()) {
        match object.schema.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(schema) if !object.name.contains('.') => push(&format!("{schema}.{}", object.name), object.line),
            _ => push(&object.name, object.line),
        }
    }
    for statement in &detail.statements {
        let Some(text) = statement.text.as_deref() else {
            continue;
        };
        for caps in CREATE_PROC_RE.captures_iter(text) {
            push(&caps[1], statement.line);
        }
    }
    out
}

fn file_operations(detail: &SqlDetail) -> Vec<(CrudOp, String)> {
    let mut ops: Vec<(CrudOp, String)> = if detail.table_operations.is_empty() {
        detail
            .statements
            .iter()
            .filter(|s| !DDL_STATEMENTS.contains(&s.statement_type.trim().to_uppercase().as_str()))
            .flat_map(|s| {
                let op = CrudOp::from_statement(&s.statement_type);
                s.tables.iter().map(move |t| (op, canonical_object_name(t)))
            })
            .collect()
    } else {
        detail
            .table_operations
            .iter()
            .map(|o| (CrudOp::from_statement(&o.operation), canonical_object_name(&o.table)))
            .collect()
    };
    ops.retain(|(_, t)| !t.is_empty());
    ops.sort();
    ops.dedup();
    ops
}

fn sql_file_facts(file: &SourceFile) -> Option<SqlFileFacts> {
    let Some(FileDetail::Sql(detail)) = &file.detail else {
        return None;
    };
    Some(SqlFileFacts {
        path: file.path.clone(),
        procedures: declared_procedures(detail),
        operations: file_operations(detail),
        tables: detail
            .objects
            .iter()
            .filter(|o| o.is_table_like())
            .map(|o| (o.name.clone(), o.object_type.trim().to_lowercase(), o.line))
            .collect(),
    })
}

/// Frozen result of phase A.
#[derive(Debug, Default)]
pub struct ProcedureMap {
    entries: HashMap<String, ProcedureEntry>,
    known_tables: HashSet<String>,
    known_procedures: HashSet<String>,
    entities: Vec<Entity>,
}

impl ProcedureMap {
    pub fn build(inventory: &SourceInventory) -> Self {
        Self::from_files(&inventory.files.iter().collect::<Vec<_>>())
    }

    /// Phase A over the given files only.
    pub fn from_files(files: &[&SourceFile]) -> Self {
        let facts: Vec<SqlFileFacts> = files.par_iter().filter_map(|f| sql_file_facts(f)).collect();
        Self::from_facts(facts)
    }

    fn from_facts(facts: Vec<SqlFileFacts>) -> Self {
        let mut map = ProcedureMap::default();
        for file in &facts {
            for (canonical, _) in &file.procedures {
                map.known_procedures.insert(unqualified_name(canonical).to_lowercase());
            }
        }
        for file in facts {
            for (name, kind, line) in &file.tables {
                map.known_tables.insert(unqualified_name(name).to_lowercase());
                map.entities
                    .push(Entity::table(name, Some(kind.as_str()), Some(SourceRef::new(&file.path, *line))));
            }
            let operations: Vec<(CrudOp, String)> = file
                .operations
                .into_iter()
                .filter(|(_, t)| !map.known_procedures.contains(&unqualified_name(t).to_lowercase()))
                .collect();
            for (_, table) in &operations {
                map.known_tables.insert(unqualified_name(table).to_lowercase());
            }
            for (canonical, line) in file.procedures {
                map.entities
                    .push(Entity::procedure(&canonical, Some(SourceRef::new(&file.path, line))));
                let unqualified = unqualified_name(&canonical).to_lowercase();
                for key in [object_key(&canonical), unqualified] {
                    let entry = map.entries.entry(key).or_insert_with(|| ProcedureEntry {
                        canonical: canonical.clone(),
                        operations: Vec::new(),
                    });
                    entry.operations.extend(operations.iter().cloned());
                    entry.operations.sort();
                    entry.operations.dedup();
                }
            }
        }
        debug!(
            procedures = map.known_procedures.len(),
            tables = map.known_tables.len(),
            "Procedure map built"
        );
        map
    }

    /// Qualified lookup first, then unqualified.
    pub fn lookup(&self, name: &str) -> Option<&ProcedureEntry> {
        self.entries
            .get(&object_key(name))
            .or_else(|| self.entries.get(&unqualified_name(name).to_lowercase()))
    }

    /// Declared canonical name when known, else the reference's own canonical form.
    pub fn canonical_procedure(&self, name: &str) -> String {
        match self.lookup(name) {
            Some(entry) => entry.canonical.clone(),
            None => canonical_object_name(name),
        }
    }

    pub fn is_known_procedure(&self, name: &str) -> bool {
        self.known_procedures.contains(&unqualified_name(name).to_lowercase())
    }

    pub fn is_known_table(&self, name: &str) -> bool {
        self.known_tables.contains(&unqualified_name(name).to_lowercase())
    }

    pub fn has_known_tables(&self) -> bool {
        !self.known_tables.is_empty()
    }

    /// Canonical table and procedure entities declared by SQL files.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }
}

// ---------------------------------------------------------------------------
// Phase B: edge expansion
// ---------------------------------------------------------------------------

fn crud_edge(from: &str, op: CrudOp, table: &str, confidence: f64, evidence: Evidence, rationale: String) -> Option<Relation> {
    let to = table_id(table);
    if to == "table_" {
        return None;
    }
    Some(Relation::new(from, op.relation_type(), &to, confidence, vec![evidence], rationale))
}

/// `invokesProcedure` plus the CRUD edges the map attributes to the callee.
fn procedure_edges(
    from: &str,
    name: &str,
    map: &ProcedureMap,
    confidence: f64,
    evidence: &Evidence,
    out: &mut Contribution,
) {
    let canonical = map.canonical_procedure(name);
    if canonical.is_empty() {
        return;
    }
    let to = proc_id(&canonical);
    if to == from {
        return;
    }
    out.gaps.references_attempted += 1;
    out.relations.push(Relation::new(
        from,
        RelationType::InvokesProcedure,
        &to,
        confidence,
        vec![evidence.clone()],
        format!("calls procedure {canonical}"),
    ));
    match map.lookup(name) {
        Some(entry) => {
            for (op, table) in &entry.operations {
                if let Some(rel) = crud_edge(
                    from,
                    *op,
                    table,
                    VIA_PROCEDURE_CONFIDENCE,
                    evidence.clone(),
                    format!("via procedure {canonical}"),
                ) {
                    out.relations.push(rel);
                }
            }
        }
        None => {
            debug!(from, procedure = %canonical, "Procedure not declared in any SQL file");
            out.gaps.unresolved_procedures += 1;
        }
    }
}

pub fn expand_java_file(path: &str, detail: &JavaDetail, map: &ProcedureMap) -> Contribution {
    let mut out = Contribution::default();
    for class in &detail.classes {
        if class.name.trim().is_empty() {
            continue;
        }
        let fqcn = class.qualified_name(detail.package.as_deref());
        for method in &class.methods {
            if method.sql_statements.is_empty() && method.procedure_calls.is_empty() {
                continue;
            }
            let from = method_id(&fqcn, &method.name);
            let before = out.relations.len();
            for statement in &method.sql_statements {
                let op = CrudOp::from_statement(&statement.statement_type);
                let evidence = line_evidence(path, statement.line.or(method.line), statement.end_line);
                for table in &statement.tables {
                    if map.is_known_procedure(table) {
                        continue;
                    }
                    if map.has_known_tables() && !map.is_known_table(table) {
                        debug!(from = %from, table = %table, "Inline SQL target is not a known table");
                        continue;
                    }
                    if let Some(rel) = crud_edge(
                        &from,
                        op,
                        table,
                        INLINE_SQL_CONFIDENCE,
                        evidence.clone(),
                        format!("inline {} statement", statement.statement_type.trim().to_uppercase()),
                    ) {
                        out.relations.push(rel);
                    }
                }
            }
            for call in &method.procedure_calls {
                let evidence = line_evidence(path, call.line.or(method.line), None);
                procedure_edges(&from, &call.name, map, INVOKES_PROCEDURE_CONFIDENCE, &evidence, &mut out);
            }
            if out.relations.len() > before {
                out.entities
                    .push(Entity::method(&fqcn, &method.name, path, method.line, method.end_line));
            }
        }
    }
    out
}

/// Table and procedure references found in one embedded-Java block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeReference {
    Table { op: CrudOp, name: String, line_offset: u32 },
    Procedure { name: String, line_offset: u32 },
}

fn line_offset(code: &str, byte: usize) -> u32 {
    code[..byte].matches('\n').count() as u32
}

/// Scan embedded Java for SQL table access and procedure calls.
pub fn scan_code(code: &str) -> Vec<CodeReference> {
    let mut refs = Vec::new();
    let table_patterns: [(&Regex, CrudOp); 4] = [
        (&*SELECT_FROM_RE, CrudOp::Read),
        (&*INSERT_INTO_RE, CrudOp::Write),
        (&*UPDATE_SET_RE, CrudOp::Write),
        (&*DELETE_FROM_RE, CrudOp::Delete),
    ];
    for (re, op) in table_patterns {
        for caps in re.captures_iter(code) {
            if let Some(m) = caps.get(1) {
                refs.push(CodeReference::Table {
                    op,
                    name: canonical_object_name(m.as_str()),
                    line_offset: line_offset(code, m.start()),
                });
            }
        }
    }
    for re in [&*CALL_RE, &*EXEC_RE] {
        for caps in re.captures_iter(code) {
            if let Some(m) = caps.get(1) {
                refs.push(CodeReference::Procedure {
                    name: canonical_object_name(m.as_str()),
                    line_offset: line_offset(code, m.start()),
                });
            }
        }
    }
    for caps in PREPARE_CALL_RE.captures_iter(code) {
        let Some(inner) = caps.get(1) else {
            continue;
        };
        if CALL_RE.is_match(inner.as_str()) || EXEC_RE.is_match(inner.as_str()) {
            continue;
        }
        if let Some(ident) = IDENT_RE.find(inner.as_str()) {
            refs.push(CodeReference::Procedure {
                name: canonical_object_name(ident.as_str()),
                line_offset: line_offset(code, inner.start()),
            });
        }
    }
    refs.retain(|r| match r {
        CodeReference::Table { name, .. } | CodeReference::Procedure { name, .. } => !name.is_empty(),
    });
    refs
}

pub fn expand_jsp_file(path: &str, detail: &JspDetail, map: &ProcedureMap) -> Contribution {
    let mut out = Contribution::default();
    let from = crate::models::graph::jsp_id(path);
    for scriptlet in &detail.scriptlets {
        let base = scriptlet.line.unwrap_or(0);
        let line_of = |offset: u32| scriptlet.line.map(|_| base + offset);
        for reference in scan_code(&scriptlet.code) {
            match reference {
                CodeReference::Table { op, name, line_offset } => {
                    let evidence = line_evidence(path, line_of(line_offset), None);
                    if map.is_known_procedure(&name) || looks_like_procedure(&name) {
                        procedure_edges(&from, &name, map, JSP_SQL_CONFIDENCE, &evidence, &mut out);
                        continue;
                    }
                    if map.has_known_tables() && !map.is_known_table(&name) {
                        continue;
                    }
                    if let Some(rel) = crud_edge(
                        &from,
                        op,
                        &name,
                        JSP_SQL_CONFIDENCE,
                        evidence,
                        "embedded SQL in page".to_string(),
                    ) {
                        out.relations.push(rel);
                    }
                }
                CodeReference::Procedure { name, line_offset } => {
                    let evidence = line_evidence(path, line_of(line_offset), None);
                    procedure_edges(&from, &name, map, JSP_SQL_CONFIDENCE, &evidence, &mut out);
                }
            }
        }
    }
    out
}

/// Edges from each procedure a SQL file declares. Scripts that declare no
/// procedure have no source entity and contribute nothing.
pub fn expand_sql_file(path: &str, detail: &SqlDetail, map: &ProcedureMap) -> Contribution {
    let mut out = Contribution::default();
    let procedures = declared_procedures(detail);
    if procedures.is_empty() {
        return out;
    }
    let operations: Vec<(CrudOp, String)> = file_operations(detail)
        .into_iter()
        .filter(|(_, t)| !map.is_known_procedure(t))
        .collect();
    for (canonical, line) in &procedures {
        let from = proc_id(canonical);
        let evidence = line_evidence(path, *line, None);
        for (op, table) in &operations {
            if let Some(rel) = crud_edge(
                &from,
                *op,
                table,
                INLINE_SQL_CONFIDENCE,
                evidence.clone(),
                format!("procedure body {op:?}").to_lowercase(),
            ) {
                out.relations.push(rel);
            }
        }
        for call in &detail.procedure_calls {
            let evidence = line_evidence(path, call.line.or(*line), None);
            procedure_edges(&from, &call.name, map, INVOKES_PROCEDURE_CONFIDENCE, &evidence, &mut out);
        }
    }
    out
}

/// Phase B for one file, honouring the per-language toggles.
pub fn expand_file(file: &SourceFile, map: &ProcedureMap, config: &AssemblerConfig) -> Contribution {
    match &file.detail {
        Some(FileDetail::Java(detail)) if config.enable_sql_from_java => expand_java_file(&file.path, detail, map),
        Some(FileDetail::Jsp(detail)) if config.enable_sql_from_jsp => expand_jsp_file(&file.path, detail, map),
        Some(FileDetail::Sql(detail)) if config.enable_sql_from_sql_files => expand_sql_file(&file.path, detail, map),
        _ => Contribution::default(),
    }
}
