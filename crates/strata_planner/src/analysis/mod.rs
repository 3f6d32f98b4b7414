//! Interface to the output of semantic analysis.
//!
//! The planner never resolves names itself. It consumes statements whose
//! table references, tuples and expressions are fully resolved, along with
//! the registry of conjuncts for each query block.

pub mod aggregate_info;
pub mod descriptor;
pub mod registry;
pub mod statement;
pub mod table;

use descriptor::DescriptorTable;
use registry::PredicateRegistry;
use statement::{InsertTarget, QueryStatement};

/// A fully analyzed statement, ready for planning.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub statement: QueryStatement,
    /// Registry for the top-level query block.
    pub registry: PredicateRegistry,
    pub desc_tbl: DescriptorTable,
    /// Set for INSERT ... SELECT.
    pub insert: Option<InsertTarget>,
}
