//! Request schema validation.

pub mod report;
pub mod schema;

pub use report::{SegmentReport, ValidationReport, Violation};
pub use schema::{
    parse_query, CompiledSchema, RawInput, RequestSchema, SchemaCompileError, Segment,
    ValidatedInput,
};
