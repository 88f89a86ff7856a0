//! Braid Config
//!
//! This crate contains the serializable workflow definition types for braid.
//! These types represent a workflow as authored, before the graph compiler
//! has validated it and before any step has run.
//!
//! Definitions can be loaded from:
//! - JSON files (via CLI with `braid run workflow.json`)
//! - Database storage (as JSON blobs)
//!
//! Parameters are plain JSON. Any JSON object of the shape
//! `{"$ref": "<step_id>.<path>", "default": <value>}` is a
//! [`VariableReference`] into another step's output; everything else is a
//! literal.
//!
//! ```json
//! {
//!   "workflow_id": "notify-on-ticket",
//!   "steps": [
//!     { "step_id": "fetch", "capability": "http", "parameters": { "url": "https://example.com" } },
//!     { "step_id": "notify", "capability": "email",
//!       "parameters": { "to": { "$ref": "fetch.body.owner.email" } } }
//!   ],
//!   "edges": [ { "source": "fetch", "target": "notify" } ]
//! }
//! ```

mod condition;
mod edge;
mod param;
mod path;
mod step;
mod workflow;

pub use condition::Condition;
pub use edge::EdgeDef;
pub use param::{ParamValue, VariableReference};
pub use path::{PathError, PathSegment, format_path, parse_path, parse_segments};
pub use step::StepDef;
pub use workflow::WorkflowDef;
