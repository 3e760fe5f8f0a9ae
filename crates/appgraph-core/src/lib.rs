//! Appgraph core library: links per-file facts extracted from a legacy
//! Java/JSP web application into one application-behaviour graph.
//!
//! The graph connects routes, handler methods, JSP pages, stored procedures,
//! tables and security roles, and summarises end-to-end traces from a route
//! to the data it touches. The library can also be built as a Python
//! extension module (`_appgraph_core`) with the `python` feature.

pub mod config;
pub mod errors;
pub mod evidence;
pub mod linker;
pub mod models;
pub mod normalize;

pub use config::AssemblerConfig;
pub use errors::{LinkerError, LinkerResult};
pub use linker::assembler::{assemble_json, Assembler};
pub use models::graph::Graph;
pub use models::inventory::SourceInventory;

#[cfg(feature = "python")]
mod python {
    use pyo3::prelude::*;
    use pyo3::wrap_pyfunction;

    /// Assemble a graph document from an inventory document. The GIL is
    /// released while linking.
    #[pyfunction]
    #[pyo3(signature = (inventory_json, config_json=None))]
    fn assemble_graph(py: Python<'_>, inventory_json: &str, config_json: Option<&str>) -> PyResult<String> {
        let inventory = inventory_json.to_string();
        let config = config_json.map(str::to_string);
        let out = py.allow_threads(move || crate::assemble_json(&inventory, config.as_deref()))?;
        Ok(out)
    }

    #[pyfunction]
    #[pyo3(signature = (path, project_root=None))]
    fn normalize_path(path: &str, project_root: Option<&str>) -> String {
        crate::normalize::normalize_path(path, project_root)
    }

    // -----------------------------------------------------------------------
    // Top-level Python module: _appgraph_core
    // -----------------------------------------------------------------------

    #[pymodule]
    fn _appgraph_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add("GRAPH_SCHEMA_VERSION", crate::models::graph::GRAPH_SCHEMA_VERSION)?;
        m.add_function(wrap_pyfunction!(assemble_graph, m)?)?;
        m.add_function(wrap_pyfunction!(normalize_path, m)?)?;
        Ok(())
    }
}
