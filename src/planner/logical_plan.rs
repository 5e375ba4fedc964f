//! Logical plan definitions.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::binder::{AggregateExpr, BoundExpression};
use crate::catalog::{ColumnDef, CsvOptions, Schema, SchemaRef};
use crate::types::Value;

/// A node of an immutable logical plan tree.
///
/// The output schema is computed when the node is built and is fully
/// determined by the operator, its parameters and its children.
#[derive(Debug, Clone)]
pub struct LogicalPlanNode {
    id: String,
    operator: LogicalOperator,
    schema: SchemaRef,
}

/// Logical operator kinds with their parameters and children.
#[derive(Debug, Clone)]
pub enum LogicalOperator {
    // === Leaf Operators ===
    /// Read columns of a data source.
    Scan {
        source: ScanSource,
        /// Columns to read, matched to the source by name.
        schema: SchemaRef,
    },

    /// Inline rows.
    Values {
        schema: SchemaRef,
        rows: Vec<Vec<Value>>,
    },

    // === Relational Operators ===
    /// Filter rows.
    Filter {
        input: Box<LogicalPlanNode>,
        predicate: BoundExpression,
    },

    /// Project columns/expressions.
    Project {
        input: Box<LogicalPlanNode>,
        /// (`output_name`, expression).
        exprs: Vec<(String, BoundExpression)>,
    },

    /// Hash aggregation; an empty `group_by` is a global aggregate.
    Aggregate {
        input: Box<LogicalPlanNode>,
        /// (`output_name`, expression).
        group_by: Vec<(String, BoundExpression)>,
        aggregates: Vec<AggregateExpr>,
    },

    /// Equi-join with an optional residual filter.
    Join {
        left: Box<LogicalPlanNode>,
        right: Box<LogicalPlanNode>,
        join_type: JoinType,
        /// (left key over the left schema, right key over the right schema).
        on: Vec<(BoundExpression, BoundExpression)>,
        /// Residual predicate over the concatenated schema.
        filter: Option<BoundExpression>,
    },

    /// Sort results.
    Sort {
        input: Box<LogicalPlanNode>,
        keys: Vec<SortExpr>,
    },

    /// Skip `offset` rows, then keep up to `fetch`.
    Limit {
        input: Box<LogicalPlanNode>,
        offset: usize,
        fetch: Option<usize>,
    },
}

/// Where a scan reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanSource {
    /// A source registered in the catalog.
    Named(String),
    /// A CSV file given inline in the plan.
    Csv { path: PathBuf, options: CsvOptions },
}

impl fmt::Display for ScanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanSource::Named(name) => write!(f, "{name}"),
            ScanSource::Csv { path, .. } => write!(f, "csv:{}", path.display()),
        }
    }
}

/// Join type for hash joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    /// Looks up a join type by its plan-document name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "inner" => Some(JoinType::Inner),
            "left" | "left_outer" => Some(JoinType::Left),
            "right" | "right_outer" => Some(JoinType::Right),
            "full" | "full_outer" | "outer" => Some(JoinType::Full),
            _ => None,
        }
    }

    /// Returns true if unmatched left rows are kept.
    #[must_use]
    pub fn keeps_left(&self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    /// Returns true if unmatched right rows are kept.
    #[must_use]
    pub fn keeps_right(&self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT OUTER"),
            JoinType::Right => write!(f, "RIGHT OUTER"),
            JoinType::Full => write!(f, "FULL OUTER"),
        }
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortExpr {
    pub expr: BoundExpression,
    pub descending: bool,
    pub nulls_first: bool,
}

impl SortExpr {
    /// Creates a new ascending sort expression.
    #[must_use]
    pub fn asc(expr: BoundExpression) -> Self {
        SortExpr {
            expr,
            descending: false,
            nulls_first: false,
        }
    }

    /// Creates a new descending sort expression.
    #[must_use]
    pub fn desc(expr: BoundExpression) -> Self {
        SortExpr {
            expr,
            descending: true,
            nulls_first: false,
        }
    }
}

impl fmt::Display for SortExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.descending { "DESC" } else { "ASC" };
        let nulls = if self.nulls_first { "NULLS FIRST" } else { "NULLS LAST" };
        write!(f, "{} {dir} {nulls}", self.expr)
    }
}

impl LogicalPlanNode {
    /// Creates a node, inferring its output schema.
    pub fn new(id: impl Into<String>, operator: LogicalOperator) -> Self {
        let schema = Arc::new(operator.infer_schema());
        LogicalPlanNode {
            id: id.into(),
            operator,
            schema,
        }
    }

    /// Creates a scan node.
    pub fn scan(id: impl Into<String>, source: ScanSource, schema: Schema) -> Self {
        Self::new(
            id,
            LogicalOperator::Scan {
                source,
                schema: Arc::new(schema),
            },
        )
    }

    /// Creates a values node.
    pub fn values(id: impl Into<String>, schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self::new(
            id,
            LogicalOperator::Values {
                schema: Arc::new(schema),
                rows,
            },
        )
    }

    /// Creates a filter node.
    pub fn filter(id: impl Into<String>, input: LogicalPlanNode, predicate: BoundExpression) -> Self {
        Self::new(
            id,
            LogicalOperator::Filter {
                input: Box::new(input),
                predicate,
            },
        )
    }

    /// Creates a project node.
    pub fn project(
        id: impl Into<String>,
        input: LogicalPlanNode,
        exprs: Vec<(String, BoundExpression)>,
    ) -> Self {
        Self::new(
            id,
            LogicalOperator::Project {
                input: Box::new(input),
                exprs,
            },
        )
    }

    /// Creates an aggregate node.
    pub fn aggregate(
        id: impl Into<String>,
        input: LogicalPlanNode,
        group_by: Vec<(String, BoundExpression)>,
        aggregates: Vec<AggregateExpr>,
    ) -> Self {
        Self::new(
            id,
            LogicalOperator::Aggregate {
                input: Box::new(input),
                group_by,
                aggregates,
            },
        )
    }

    /// Creates a join node.
    pub fn join(
        id: impl Into<String>,
        left: LogicalPlanNode,
        right: LogicalPlanNode,
        join_type: JoinType,
        on: Vec<(BoundExpression, BoundExpression)>,
        filter: Option<BoundExpression>,
    ) -> Self {
        Self::new(
            id,
            LogicalOperator::Join {
                left: Box::new(left),
                right: Box::new(right),
                join_type,
                on,
                filter,
            },
        )
    }

    /// Creates a sort node.
    pub fn sort(id: impl Into<String>, input: LogicalPlanNode, keys: Vec<SortExpr>) -> Self {
        Self::new(
            id,
            LogicalOperator::Sort {
                input: Box::new(input),
                keys,
            },
        )
    }

    /// Creates a limit node.
    pub fn limit(
        id: impl Into<String>,
        input: LogicalPlanNode,
        offset: usize,
        fetch: Option<usize>,
    ) -> Self {
        Self::new(
            id,
            LogicalOperator::Limit {
                input: Box::new(input),
                offset,
                fetch,
            },
        )
    }

    /// Returns the operator identity used in errors.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the operator.
    #[must_use]
    pub fn operator(&self) -> &LogicalOperator {
        &self.operator
    }

    /// Returns the output schema.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Returns the operator kind as written in plan documents.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.operator.kind()
    }

    /// Returns the child plans.
    #[must_use]
    pub fn children(&self) -> Vec<&LogicalPlanNode> {
        match &self.operator {
            LogicalOperator::Scan { .. } | LogicalOperator::Values { .. } => vec![],
            LogicalOperator::Filter { input, .. }
            | LogicalOperator::Project { input, .. }
            | LogicalOperator::Aggregate { input, .. }
            | LogicalOperator::Sort { input, .. }
            | LogicalOperator::Limit { input, .. } => vec![input.as_ref()],
            LogicalOperator::Join { left, right, .. } => vec![left.as_ref(), right.as_ref()],
        }
    }

    /// Returns the number of nodes in the tree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + self
            .children()
            .into_iter()
            .map(LogicalPlanNode::node_count)
            .sum::<usize>()
    }
}

impl LogicalOperator {
    /// Returns the operator kind as written in plan documents.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            LogicalOperator::Scan { .. } => "scan",
            LogicalOperator::Values { .. } => "values",
            LogicalOperator::Filter { .. } => "filter",
            LogicalOperator::Project { .. } => "project",
            LogicalOperator::Aggregate { .. } => "aggregate",
            LogicalOperator::Join { .. } => "join",
            LogicalOperator::Sort { .. } => "sort",
            LogicalOperator::Limit { .. } => "limit",
        }
    }

    fn infer_schema(&self) -> Schema {
        match self {
            LogicalOperator::Scan { schema, .. } | LogicalOperator::Values { schema, .. } => {
                schema.as_ref().clone()
            }
            LogicalOperator::Filter { input, .. }
            | LogicalOperator::Sort { input, .. }
            | LogicalOperator::Limit { input, .. } => input.schema().as_ref().clone(),
            LogicalOperator::Project { exprs, .. } => exprs
                .iter()
                .map(|(name, expr)| {
                    ColumnDef::new(name.clone(), expr.data_type()).with_nullable(expr.nullable())
                })
                .collect(),
            LogicalOperator::Aggregate {
                group_by,
                aggregates,
                ..
            } => group_by
                .iter()
                .map(|(name, expr)| {
                    ColumnDef::new(name.clone(), expr.data_type()).with_nullable(expr.nullable())
                })
                .chain(aggregates.iter().map(|agg| {
                    ColumnDef::new(agg.name.clone(), agg.data_type()).with_nullable(agg.nullable())
                }))
                .collect(),
            LogicalOperator::Join {
                left,
                right,
                join_type,
                ..
            } => {
                let left_schema = if join_type.keeps_right() {
                    left.schema().to_nullable()
                } else {
                    left.schema().as_ref().clone()
                };
                let right_schema = if join_type.keeps_left() {
                    right.schema().to_nullable()
                } else {
                    right.schema().as_ref().clone()
                };
                left_schema.join(&right_schema)
            }
        }
    }
}

// =============================================================================
// Display implementation for EXPLAIN output
// =============================================================================

impl fmt::Display for LogicalPlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.format_plan(f, 0)
    }
}

impl LogicalPlanNode {
    /// Formats the plan as a tree with indentation.
    fn format_plan(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let prefix = "  ".repeat(indent);
        let child_prefix = "  ".repeat(indent + 1);
        let id = &self.id;

        match &self.operator {
            LogicalOperator::Scan { source, schema } => {
                writeln!(f, "{prefix}Scan [{id}]: {source} {}", schema)?;
            }
            LogicalOperator::Values { rows, .. } => {
                writeln!(f, "{prefix}Values [{id}]: {} rows {}", rows.len(), self.schema)?;
            }
            LogicalOperator::Filter { input, predicate } => {
                writeln!(f, "{prefix}Filter [{id}]: {predicate}")?;
                input.format_plan(f, indent + 1)?;
            }
            LogicalOperator::Project { input, exprs } => {
                let parts: Vec<_> = exprs
                    .iter()
                    .map(|(name, expr)| format!("{expr} AS {name}"))
                    .collect();
                writeln!(f, "{prefix}Project [{id}]: [{}]", parts.join(", "))?;
                input.format_plan(f, indent + 1)?;
            }
            LogicalOperator::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let aggs: Vec<_> = aggregates.iter().map(ToString::to_string).collect();
                let groups: Vec<_> = group_by
                    .iter()
                    .map(|(name, expr)| format!("{expr} AS {name}"))
                    .collect();
                writeln!(
                    f,
                    "{prefix}Aggregate [{id}]: [{}] GROUP BY [{}]",
                    aggs.join(", "),
                    groups.join(", ")
                )?;
                input.format_plan(f, indent + 1)?;
            }
            LogicalOperator::Join {
                left,
                right,
                join_type,
                on,
                filter,
            } => {
                let keys: Vec<_> = on.iter().map(|(l, r)| format!("{l} = {r}")).collect();
                write!(f, "{prefix}HashJoin [{id}]: {join_type} ON [{}]", keys.join(", "))?;
                if let Some(filter) = filter {
                    write!(f, " FILTER {filter}")?;
                }
                writeln!(f)?;
                writeln!(f, "{child_prefix}Probe Side:")?;
                left.format_plan(f, indent + 2)?;
                writeln!(f, "{child_prefix}Build Side:")?;
                right.format_plan(f, indent + 2)?;
            }
            LogicalOperator::Sort { input, keys } => {
                let keys: Vec<_> = keys.iter().map(ToString::to_string).collect();
                writeln!(f, "{prefix}Sort [{id}]: [{}]", keys.join(", "))?;
                input.format_plan(f, indent + 1)?;
            }
            LogicalOperator::Limit {
                input,
                offset,
                fetch,
            } => {
                let fetch_str = fetch.map_or(String::new(), |l| format!(" FETCH {l}"));
                writeln!(f, "{prefix}Limit [{id}]: OFFSET {offset}{fetch_str}")?;
                input.format_plan(f, indent + 1)?;
            }
        }
        Ok(())
    }
}
