//! Cohort engine: the query-safety pipeline for segment definitions.
//!
//! Segment definitions are author-written, parameterized, read-only SQL
//! queries that select member identifiers. Before any of them reaches a
//! database, the pipeline runs three stages:
//!
//! 1. [`validate::QueryValidator`] rejects text that is not a single,
//!    read-only SELECT over allowlisted tables.
//! 2. [`substitute::VariableSubstitutor`] turns `{{name}}` placeholders into
//!    driver-quoted literals and re-validates the rendered text.
//! 3. [`execute::SegmentEngine`] routes to a read replica when available,
//!    bounds the result with a LIMIT, and runs under paired client-side and
//!    server-side timeouts.
//!
//! Each stage fails closed: any doubt stops the query.

pub mod definition;
pub mod estimate;
pub mod execute;
pub mod router;
pub mod store;
pub mod substitute;
pub mod validate;

pub use definition::{
    Bindings, ExecutionOptions, ExecutionOutcome, QueryDefinition, ValidationReport, VarType,
    VarValue, VariableSpec,
};
pub use execute::SegmentEngine;
pub use router::{ConnectionRole, ReplicaHealth, ReplicaRouter};
pub use store::{DefinitionStore, InMemoryDefinitionStore, Member, PostgresDefinitionStore};
pub use substitute::VariableSubstitutor;
pub use validate::QueryValidator;
