//! Assembler configuration: framework toggles, evidence sampling and quality
//! gate thresholds.
//!
//! The configuration is an explicit immutable value handed to
//! [`crate::linker::assembler::Assembler::new`]; nothing here is process-wide.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{LinkerError, LinkerResult};

pub const DEFAULT_MAX_EVIDENCE_PER_RELATION: usize = 50;

// ---------------------------------------------------------------------------
// Quality gates
// ---------------------------------------------------------------------------

/// Thresholds an outer pipeline stage may enforce. All values are percentages
/// in `[0, 100]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGates {
    pub min_parse_success_pct: f64,
    pub min_route_resolution_pct: f64,
    pub max_unresolved_pct: f64,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            min_parse_success_pct: 0.0,
            min_route_resolution_pct: 0.0,
            max_unresolved_pct: 100.0,
        }
    }
}

// ---------------------------------------------------------------------------
// AssemblerConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    pub enable_servlet: bool,
    pub enable_jaxrs: bool,
    pub enable_jsp_links: bool,
    pub enable_sql_from_java: bool,
    pub enable_sql_from_jsp: bool,
    pub enable_sql_from_sql_files: bool,
    pub enable_security_roles: bool,
    pub enable_jsp_security: bool,
    pub enable_trace_evidence: bool,
    /// Additional role-extraction regexes applied to JSP tag, EL and scriptlet
    /// text. The first capture group is the role; without one, the whole match.
    pub extra_security_patterns: Vec<String>,
    /// Fraction of evidence kept per relation, in `[0, 1]`.
    pub evidence_sample_rate: f64,
    pub max_evidence_per_relation: usize,
    /// Worker threads for the per-file phases; `0` uses the rayon default.
    pub workers: usize,
    pub quality_gates: QualityGates,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            enable_servlet: true,
            enable_jaxrs: true,
            enable_jsp_links: true,
            enable_sql_from_java: true,
            enable_sql_from_jsp: true,
            enable_sql_from_sql_files: true,
            enable_security_roles: true,
            enable_jsp_security: true,
            enable_trace_evidence: true,
            extra_security_patterns: Vec::new(),
            evidence_sample_rate: 1.0,
            max_evidence_per_relation: DEFAULT_MAX_EVIDENCE_PER_RELATION,
            workers: 0,
            quality_gates: QualityGates::default(),
        }
    }
}

fn env_flag(name: &str, current: bool) -> bool {
    match std::env::var(name) {
        Ok(val) => {
            let v = val.trim().to_lowercase();
            if matches!(v.as_str(), "0" | "false" | "no" | "off") {
                false
            } else if matches!(v.as_str(), "1" | "true" | "yes" | "on") {
                true
            } else {
                current
            }
        }
        Err(_) => current,
    }
}

impl AssemblerConfig {
    pub fn from_json(raw: &str) -> LinkerResult<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(LinkerError::not_an_object("config", &value));
        }
        let config: AssemblerConfig = serde_json::from_value(value)?;
        Ok(config.validated())
    }

    /// Apply `APPGRAPH_*` environment overrides on top of this config.
    pub fn with_env_overrides(mut self) -> Self {
        self.enable_servlet = env_flag("APPGRAPH_ENABLE_SERVLET", self.enable_servlet);
        self.enable_jaxrs = env_flag("APPGRAPH_ENABLE_JAXRS", self.enable_jaxrs);
        self.enable_jsp_links = env_flag("APPGRAPH_ENABLE_JSP_LINKS", self.enable_jsp_links);
        self.enable_sql_from_java =
            env_flag("APPGRAPH_ENABLE_SQL_FROM_JAVA", self.enable_sql_from_java);
        self.enable_sql_from_jsp = env_flag("APPGRAPH_ENABLE_SQL_FROM_JSP", self.enable_sql_from_jsp);
        self.enable_sql_from_sql_files = env_flag(
            "APPGRAPH_ENABLE_SQL_FROM_SQL_FILES",
            self.enable_sql_from_sql_files,
        );
        self.enable_security_roles =
            env_flag("APPGRAPH_ENABLE_SECURITY_ROLES", self.enable_security_roles);
        self.enable_jsp_security = env_flag("APPGRAPH_ENABLE_JSP_SECURITY", self.enable_jsp_security);
        self.enable_trace_evidence =
            env_flag("APPGRAPH_ENABLE_TRACE_EVIDENCE", self.enable_trace_evidence);
        if let Ok(val) = std::env::var("APPGRAPH_EVIDENCE_SAMPLE_RATE") {
            match val.trim().parse::<f64>() {
                Ok(rate) => self.evidence_sample_rate = rate,
                Err(_) => warn!("Ignoring APPGRAPH_EVIDENCE_SAMPLE_RATE={val:?}: not a number"),
            }
        }
        if let Ok(val) = std::env::var("APPGRAPH_WORKERS") {
            match val.trim().parse::<usize>() {
                Ok(workers) => self.workers = workers,
                Err(_) => warn!("Ignoring APPGRAPH_WORKERS={val:?}: not a number"),
            }
        }
        self.validated()
    }

    /// Clamp numeric knobs into their valid ranges.
    pub fn validated(mut self) -> Self {
        if !self.evidence_sample_rate.is_finite() {
            self.evidence_sample_rate = 1.0;
        }
        self.evidence_sample_rate = self.evidence_sample_rate.clamp(0.0, 1.0);
        self.max_evidence_per_relation = self.max_evidence_per_relation.max(1);
        let gates = &mut self.quality_gates;
        gates.min_parse_success_pct = gates.min_parse_success_pct.clamp(0.0, 100.0);
        gates.min_route_resolution_pct = gates.min_route_resolution_pct.clamp(0.0, 100.0);
        gates.max_unresolved_pct = gates.max_unresolved_pct.clamp(0.0, 100.0);
        self
    }

    /// Compile `extra_security_patterns`, returning the valid regexes and an
    /// error per pattern that failed to compile.
    pub fn compile_extra_patterns(&self) -> (Vec<Regex>, Vec<LinkerError>) {
        let mut compiled = Vec::new();
        let mut errors = Vec::new();
        for pattern in &self.extra_security_patterns {
            match Regex::new(pattern) {
                Ok(re) => compiled.push(re),
                Err(e) => errors.push(LinkerError::Pattern(format!("{pattern}: {e}"))),
            }
        }
        (compiled, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_everything() {
        let config = AssemblerConfig::default();
        assert!(config.enable_servlet);
        assert!(config.enable_jsp_security);
        assert_eq!(config.evidence_sample_rate, 1.0);
        assert_eq!(config.max_evidence_per_relation, DEFAULT_MAX_EVIDENCE_PER_RELATION);
    }

    #[test]
    fn test_from_json_partial_uses_defaults() {
        let config =
            AssemblerConfig::from_json(r#"{"enable_servlet": false, "workers": 2}"#).unwrap();
        assert!(!config.enable_servlet);
        assert!(config.enable_jaxrs);
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn test_validated_clamps_rates() {
        let config = AssemblerConfig {
            evidence_sample_rate: 3.5,
            max_evidence_per_relation: 0,
            quality_gates: QualityGates {
                min_parse_success_pct: -10.0,
                min_route_resolution_pct: 250.0,
                max_unresolved_pct: 50.0,
            },
            ..AssemblerConfig::default()
        }
        .validated();
        assert_eq!(config.evidence_sample_rate, 1.0);
        assert_eq!(config.max_evidence_per_relation, 1);
        assert_eq!(config.quality_gates.min_parse_success_pct, 0.0);
        assert_eq!(config.quality_gates.min_route_resolution_pct, 100.0);
    }

    #[test]
    fn test_nan_sample_rate_resets() {
        let config = AssemblerConfig {
            evidence_sample_rate: f64::NAN,
            ..AssemblerConfig::default()
        }
        .validated();
        assert_eq!(config.evidence_sample_rate, 1.0);
    }

    #[test]
    fn test_compile_extra_patterns_reports_invalid() {
        let config = AssemblerConfig {
            extra_security_patterns: vec![
                r"checkAccess\(\s*'([A-Z_]+)'".to_string(),
                "([unclosed".to_string(),
            ],
            ..AssemblerConfig::default()
        };
        let (compiled, errors) = config.compile_extra_patterns();
        assert_eq!(compiled.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], LinkerError::Pattern(_)));
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(AssemblerConfig::from_json("{not json").is_err());
        assert!(matches!(
            AssemblerConfig::from_json("true"),
            Err(LinkerError::InvalidInput(_))
        ));
    }
}
