//! Query planner module.
//!
//! Plans arrive as JSON documents produced by an external planner. The
//! [`PlanDeserializer`] validates them into immutable [`LogicalPlanNode`]
//! trees that the executor runs as-is.

pub mod deserializer;
pub mod logical_plan;

pub use deserializer::PlanDeserializer;
pub use logical_plan::{JoinType, LogicalOperator, LogicalPlanNode, ScanSource, SortExpr};
