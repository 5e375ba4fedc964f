//! JSON plan document deserialization.
//!
//! A plan document is a tree of operator objects. Every node has an `"op"`
//! field naming its kind and may carry an `"id"` (used in execution errors)
//! and a declared output `"schema"`, which must agree with the schema the
//! deserializer infers. Errors carry the JSON path of the offending part of
//! the document, e.g. `$.input.predicate.args[1]`.

use std::path::PathBuf;

use serde_json::{Map, Value as Json};

use super::logical_plan::{JoinType, LogicalPlanNode, ScanSource, SortExpr};
use crate::binder::{literal_value, BindError, BoundExpression, ColumnRef, ExpressionBinder};
use crate::catalog::{Catalog, ColumnDef, CsvOptions, Schema};
use crate::error::{Result, VexelError};
use crate::types::{DataType, Value};

type Object = Map<String, Json>;

/// Parses plan documents into validated logical plan trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanDeserializer<'a> {
    catalog: Option<&'a Catalog>,
}

impl<'a> PlanDeserializer<'a> {
    /// Creates a deserializer without a catalog: every scan must declare its
    /// schema.
    #[must_use]
    pub fn new() -> Self {
        PlanDeserializer { catalog: None }
    }

    /// Attaches a catalog, letting scans of registered sources omit their
    /// schema.
    #[must_use]
    pub fn with_catalog(mut self, catalog: &'a Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Parses and validates a plan document.
    ///
    /// # Errors
    ///
    /// Returns `PlanParse` if the text is not well-formed JSON and
    /// `PlanSchema` if the document does not describe a valid plan.
    pub fn deserialize(&self, text: &str) -> Result<LogicalPlanNode> {
        let json: Json = serde_json::from_str(text)?;
        self.deserialize_value(&json)
    }

    /// Validates an already parsed plan document.
    ///
    /// # Errors
    ///
    /// Returns `PlanSchema` if the document does not describe a valid plan.
    pub fn deserialize_value(&self, json: &Json) -> Result<LogicalPlanNode> {
        let plan = self.node(json, "$")?;
        tracing::debug!(nodes = plan.node_count(), root = plan.id(), "deserialized plan");
        Ok(plan)
    }

    fn node(&self, json: &Json, path: &str) -> Result<LogicalPlanNode> {
        let map = as_object(json, path)?;
        let kind = required_str(map, "op", path)?;
        let id = match map.get("id") {
            None | Some(Json::Null) => format!("{kind}@{path}"),
            Some(Json::String(id)) => id.clone(),
            Some(_) => return Err(VexelError::plan_schema(format!("{path}.id"), "expected a string")),
        };

        let node = match kind {
            "scan" => return self.scan(map, id, path),
            "values" => return values(map, id, path),
            "filter" => self.filter(map, id, path)?,
            "project" => self.project(map, id, path)?,
            "aggregate" => self.aggregate(map, id, path)?,
            "join" => self.join(map, id, path)?,
            "sort" => self.sort(map, id, path)?,
            "limit" => self.limit(map, id, path)?,
            other => {
                return Err(VexelError::plan_schema(
                    format!("{path}.op"),
                    format!("unknown operator kind '{other}'"),
                ))
            }
        };

        if let Some(declared) = map.get("schema") {
            let schema_path = format!("{path}.schema");
            let declared = schema(declared, &schema_path)?;
            check_declared_schema(&declared, node.schema(), &schema_path)?;
        }
        Ok(node)
    }

    // ==================== Operators ====================

    fn scan(&self, map: &Object, id: String, path: &str) -> Result<LogicalPlanNode> {
        let source_path = format!("{path}.source");
        let source = match map.get("source") {
            Some(Json::String(name)) => ScanSource::Named(name.clone()),
            Some(Json::Object(csv)) => csv_source(csv, &source_path)?,
            Some(_) => {
                return Err(VexelError::plan_schema(
                    source_path,
                    "expected a source name or a {\"csv\": path} object",
                ))
            }
            None => return Err(missing(path, "source")),
        };

        let schema_path = format!("{path}.schema");
        let schema = match (map.get("schema"), &source) {
            (Some(json), _) => schema(json, &schema_path)?,
            (None, ScanSource::Named(name)) => self
                .catalog
                .and_then(|c| c.schema_of(name))
                .map(|s| s.as_ref().clone())
                .ok_or_else(|| {
                    VexelError::plan_schema(
                        path,
                        format!("scan of '{name}' needs a schema: the source is not registered"),
                    )
                })?,
            (None, ScanSource::Csv { .. }) => return Err(missing(path, "schema")),
        };
        if schema.is_empty() {
            return Err(VexelError::plan_schema(schema_path, "a scan must read at least one column"));
        }
        Ok(LogicalPlanNode::scan(id, source, schema))
    }

    fn filter(&self, map: &Object, id: String, path: &str) -> Result<LogicalPlanNode> {
        let input = self.child(map, "input", path)?;
        let predicate_path = format!("{path}.predicate");
        let binder = ExpressionBinder::new(input.schema());
        let predicate = expr(&binder, required(map, "predicate", path)?, &predicate_path)?;
        let predicate = binder
            .predicate(predicate)
            .map_err(|e| bind_error(&predicate_path, &e))?;
        Ok(LogicalPlanNode::filter(id, input, predicate))
    }

    fn project(&self, map: &Object, id: String, path: &str) -> Result<LogicalPlanNode> {
        let input = self.child(map, "input", path)?;
        let binder = ExpressionBinder::new(input.schema());
        let exprs_path = format!("{path}.exprs");
        let items = as_array(required(map, "exprs", path)?, &exprs_path)?;
        if items.is_empty() {
            return Err(VexelError::plan_schema(exprs_path, "a projection needs at least one expression"));
        }
        let exprs = named_exprs(&binder, items, &exprs_path)?;
        check_unique_names(exprs.iter().map(|(n, _)| n.as_str()), &exprs_path)?;
        Ok(LogicalPlanNode::project(id, input, exprs))
    }

    fn aggregate(&self, map: &Object, id: String, path: &str) -> Result<LogicalPlanNode> {
        let input = self.child(map, "input", path)?;
        let binder = ExpressionBinder::new(input.schema());

        let group_path = format!("{path}.group_by");
        let group_by = match map.get("group_by") {
            None | Some(Json::Null) => Vec::new(),
            Some(json) => named_exprs(&binder, as_array(json, &group_path)?, &group_path)?,
        };

        let aggs_path = format!("{path}.aggregates");
        let items = match map.get("aggregates") {
            None | Some(Json::Null) => &[][..],
            Some(json) => as_array(json, &aggs_path)?.as_slice(),
        };
        let mut aggregates = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{aggs_path}[{i}]");
            let item = as_object(item, &item_path)?;
            let name = required_str(item, "name", &item_path)?;
            let function = required_str(item, "function", &item_path)?;
            let arg_path = format!("{item_path}.arg");
            let arg = match item.get("arg") {
                None | Some(Json::Null) => None,
                Some(json) => Some(expr(&binder, json, &arg_path)?),
            };
            let aggregate = binder.aggregate(name, function, arg).map_err(|e| {
                let at = if e.argument_index().is_some() { &arg_path } else { &item_path };
                bind_error(at, &e)
            })?;
            aggregates.push(aggregate);
        }

        if group_by.is_empty() && aggregates.is_empty() {
            return Err(VexelError::plan_schema(
                path,
                "an aggregate needs at least one group key or aggregate",
            ));
        }
        check_unique_names(
            group_by
                .iter()
                .map(|(n, _)| n.as_str())
                .chain(aggregates.iter().map(|a| a.name.as_str())),
            path,
        )?;
        Ok(LogicalPlanNode::aggregate(id, input, group_by, aggregates))
    }

    fn join(&self, map: &Object, id: String, path: &str) -> Result<LogicalPlanNode> {
        let left = self.child(map, "left", path)?;
        let right = self.child(map, "right", path)?;

        let join_type = match map.get("join_type") {
            None | Some(Json::Null) => JoinType::Inner,
            Some(Json::String(name)) => JoinType::from_name(name).ok_or_else(|| {
                VexelError::plan_schema(
                    format!("{path}.join_type"),
                    format!("unknown join type '{name}'"),
                )
            })?,
            Some(_) => {
                return Err(VexelError::plan_schema(format!("{path}.join_type"), "expected a string"))
            }
        };

        let left_binder = ExpressionBinder::new(left.schema());
        let right_binder = ExpressionBinder::new(right.schema());
        let on_path = format!("{path}.on");
        let items = match map.get("on") {
            None | Some(Json::Null) => &[][..],
            Some(json) => as_array(json, &on_path)?.as_slice(),
        };
        let mut on = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{on_path}[{i}]");
            let item = as_object(item, &item_path)?;
            let l = expr(&left_binder, required(item, "left", &item_path)?, &format!("{item_path}.left"))?;
            let r = expr(&right_binder, required(item, "right", &item_path)?, &format!("{item_path}.right"))?;
            let common = DataType::common_type(l.data_type(), r.data_type()).ok_or_else(|| {
                VexelError::plan_schema(
                    &item_path,
                    format!(
                        "join keys have incompatible types {} and {}",
                        l.data_type(),
                        r.data_type()
                    ),
                )
            })?;
            on.push((l.cast_to(common), r.cast_to(common)));
        }

        let filter = match map.get("filter") {
            None | Some(Json::Null) => None,
            Some(json) => {
                let filter_path = format!("{path}.filter");
                let combined = left.schema().join(right.schema());
                let binder = ExpressionBinder::new(&combined);
                let predicate = expr(&binder, json, &filter_path)?;
                Some(
                    binder
                        .predicate(predicate)
                        .map_err(|e| bind_error(&filter_path, &e))?,
                )
            }
        };

        Ok(LogicalPlanNode::join(id, left, right, join_type, on, filter))
    }

    fn sort(&self, map: &Object, id: String, path: &str) -> Result<LogicalPlanNode> {
        let input = self.child(map, "input", path)?;
        let binder = ExpressionBinder::new(input.schema());
        let keys_path = format!("{path}.keys");
        let items = as_array(required(map, "keys", path)?, &keys_path)?;
        if items.is_empty() {
            return Err(VexelError::plan_schema(keys_path, "a sort needs at least one key"));
        }
        let mut keys = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{keys_path}[{i}]");
            let item = as_object(item, &item_path)?;
            let key = expr(&binder, required(item, "expr", &item_path)?, &format!("{item_path}.expr"))?;
            keys.push(SortExpr {
                expr: key,
                descending: optional_bool(item, "descending", &item_path)?.unwrap_or(false),
                nulls_first: optional_bool(item, "nulls_first", &item_path)?.unwrap_or(false),
            });
        }
        Ok(LogicalPlanNode::sort(id, input, keys))
    }

    fn limit(&self, map: &Object, id: String, path: &str) -> Result<LogicalPlanNode> {
        let input = self.child(map, "input", path)?;
        let offset = optional_count(map, "offset", path)?.unwrap_or(0);
        let fetch = optional_count(map, "fetch", path)?;
        Ok(LogicalPlanNode::limit(id, input, offset, fetch))
    }

    fn child(&self, map: &Object, field: &str, path: &str) -> Result<LogicalPlanNode> {
        let json = required(map, field, path)?;
        self.node(json, &format!("{path}.{field}"))
    }
}

fn values(map: &Object, id: String, path: &str) -> Result<LogicalPlanNode> {
    let schema_path = format!("{path}.schema");
    let schema = schema(required(map, "schema", path)?, &schema_path)?;
    if schema.is_empty() {
        return Err(VexelError::plan_schema(schema_path, "values need at least one column"));
    }

    let rows_path = format!("{path}.rows");
    let items = as_array(required(map, "rows", path)?, &rows_path)?;
    let mut rows = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let row_path = format!("{rows_path}[{i}]");
        let cells = as_array(item, &row_path)?;
        if cells.len() != schema.len() {
            return Err(VexelError::plan_schema(
                row_path,
                format!("row has {} values, schema has {} columns", cells.len(), schema.len()),
            ));
        }
        let row = cells
            .iter()
            .zip(schema.columns())
            .enumerate()
            .map(|(j, (cell, def))| {
                let cell_path = format!("{row_path}[{j}]");
                let (value, _) =
                    literal_value(cell, Some(def.data_type)).map_err(|e| bind_error(&cell_path, &e))?;
                if value.is_null() && !def.nullable {
                    return Err(VexelError::plan_schema(
                        cell_path,
                        format!("null value in non-nullable column '{}'", def.name),
                    ));
                }
                Ok(value)
            })
            .collect::<Result<Vec<Value>>>()?;
        rows.push(row);
    }
    Ok(LogicalPlanNode::values(id, schema, rows))
}

fn csv_source(map: &Object, path: &str) -> Result<ScanSource> {
    let file = required_str(map, "csv", path)?;
    let mut options = map.clone();
    options.remove("csv");
    let options: CsvOptions = serde_json::from_value(Json::Object(options))
        .map_err(|e| VexelError::plan_schema(path, format!("invalid CSV options: {e}")))?;
    Ok(ScanSource::Csv {
        path: PathBuf::from(file),
        options,
    })
}

// ==================== Expressions ====================

fn expr(binder: &ExpressionBinder<'_>, json: &Json, path: &str) -> Result<BoundExpression> {
    let map = as_object(json, path)?;

    if let Some(column) = map.get("column") {
        let column = match column {
            Json::String(name) => ColumnRef::Name(name.clone()),
            Json::Number(n) => ColumnRef::Index(
                n.as_u64()
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(|| {
                        VexelError::plan_schema(
                            format!("{path}.column"),
                            "column index must be a non-negative integer",
                        )
                    })?,
            ),
            _ => {
                return Err(VexelError::plan_schema(
                    format!("{path}.column"),
                    "expected a column name or index",
                ))
            }
        };
        return binder.column(&column).map_err(|e| bind_error(path, &e));
    }

    if let Some(literal) = map.get("literal") {
        let data_type = optional_type(map, path)?;
        return binder
            .literal(literal, data_type)
            .map_err(|e| bind_error(path, &e));
    }

    if let Some(function) = map.get("call") {
        let Json::String(function) = function else {
            return Err(VexelError::plan_schema(format!("{path}.call"), "expected a function name"));
        };
        let args_path = format!("{path}.args");
        let args = match map.get("args") {
            None | Some(Json::Null) => Vec::new(),
            Some(json) => as_array(json, &args_path)?
                .iter()
                .enumerate()
                .map(|(i, arg)| expr(binder, arg, &format!("{args_path}[{i}]")))
                .collect::<Result<Vec<_>>>()?,
        };
        return binder.call(function, args).map_err(|e| match e.argument_index() {
            Some(i) => bind_error(&format!("{args_path}[{i}]"), &e),
            None => bind_error(path, &e),
        });
    }

    if let Some(operand) = map.get("cast") {
        let operand = expr(binder, operand, &format!("{path}.cast"))?;
        let data_type = optional_type(map, path)?.ok_or_else(|| missing(path, "type"))?;
        return binder
            .cast(operand, data_type)
            .map_err(|e| bind_error(path, &e));
    }

    Err(VexelError::plan_schema(
        path,
        "expression must have one of 'column', 'literal', 'call' or 'cast'",
    ))
}

fn named_exprs(
    binder: &ExpressionBinder<'_>,
    items: &[Json],
    path: &str,
) -> Result<Vec<(String, BoundExpression)>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let item_path = format!("{path}[{i}]");
            let item = as_object(item, &item_path)?;
            let name = required_str(item, "name", &item_path)?;
            let bound = expr(binder, required(item, "expr", &item_path)?, &format!("{item_path}.expr"))?;
            Ok((name.to_string(), bound))
        })
        .collect()
}

// ==================== Schemas ====================

fn schema(json: &Json, path: &str) -> Result<Schema> {
    let items = as_array(json, path)?;
    let columns = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let item_path = format!("{path}[{i}]");
            let item = as_object(item, &item_path)?;
            let name = required_str(item, "name", &item_path)?;
            if name.is_empty() {
                return Err(VexelError::plan_schema(format!("{item_path}.name"), "column name cannot be empty"));
            }
            let data_type = optional_type(item, &item_path)?.ok_or_else(|| missing(&item_path, "type"))?;
            let nullable = optional_bool(item, "nullable", &item_path)?.unwrap_or(true);
            Ok(ColumnDef::new(name, data_type).with_nullable(nullable))
        })
        .collect::<Result<Vec<_>>>()?;
    let schema = Schema::new(columns);
    if let Some(name) = schema.duplicate_name() {
        return Err(VexelError::plan_schema(path, format!("duplicate column name '{name}'")));
    }
    Ok(schema)
}

fn check_declared_schema(declared: &Schema, inferred: &Schema, path: &str) -> Result<()> {
    if declared.len() != inferred.len() {
        return Err(VexelError::plan_schema(
            path,
            format!(
                "declared schema has {} columns, inferred schema {inferred} has {}",
                declared.len(),
                inferred.len()
            ),
        ));
    }
    for (i, (d, inf)) in declared.columns().iter().zip(inferred.columns()).enumerate() {
        // Declaring a column nullable that cannot hold nulls is allowed.
        if d.name != inf.name || d.data_type != inf.data_type || (!d.nullable && inf.nullable) {
            return Err(VexelError::plan_schema(
                format!("{path}[{i}]"),
                format!("declared column {d} does not match inferred column {inf}"),
            ));
        }
    }
    Ok(())
}

fn check_unique_names<'n>(names: impl Iterator<Item = &'n str>, path: &str) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(VexelError::plan_schema(path, format!("duplicate output name '{name}'")));
        }
    }
    Ok(())
}

// ==================== JSON helpers ====================

fn bind_error(path: &str, err: &BindError) -> VexelError {
    VexelError::plan_schema(path, err.to_string())
}

fn missing(path: &str, field: &str) -> VexelError {
    VexelError::plan_schema(path, format!("missing required field '{field}'"))
}

fn as_object<'j>(json: &'j Json, path: &str) -> Result<&'j Object> {
    json.as_object()
        .ok_or_else(|| VexelError::plan_schema(path, "expected an object"))
}

fn as_array<'j>(json: &'j Json, path: &str) -> Result<&'j Vec<Json>> {
    json.as_array()
        .ok_or_else(|| VexelError::plan_schema(path, "expected an array"))
}

fn required<'j>(map: &'j Object, field: &str, path: &str) -> Result<&'j Json> {
    match map.get(field) {
        None | Some(Json::Null) => Err(missing(path, field)),
        Some(json) => Ok(json),
    }
}

fn required_str<'j>(map: &'j Object, field: &str, path: &str) -> Result<&'j str> {
    required(map, field, path)?
        .as_str()
        .ok_or_else(|| VexelError::plan_schema(format!("{path}.{field}"), "expected a string"))
}

fn optional_bool(map: &Object, field: &str, path: &str) -> Result<Option<bool>> {
    match map.get(field) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(VexelError::plan_schema(format!("{path}.{field}"), "expected a boolean")),
    }
}

fn optional_count(map: &Object, field: &str, path: &str) -> Result<Option<usize>> {
    match map.get(field) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Number(n)) => n
            .as_u64()
            .and_then(|v| usize::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| {
                VexelError::plan_schema(
                    format!("{path}.{field}"),
                    format!("must be a non-negative integer, got {n}"),
                )
            }),
        Some(_) => Err(VexelError::plan_schema(
            format!("{path}.{field}"),
            "must be a non-negative integer",
        )),
    }
}

fn optional_type(map: &Object, path: &str) -> Result<Option<DataType>> {
    match map.get("type") {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(name)) => DataType::parse(name).map(Some).ok_or_else(|| {
            VexelError::plan_schema(format!("{path}.type"), format!("unknown type '{name}'"))
        }),
        Some(_) => Err(VexelError::plan_schema(format!("{path}.type"), "expected a type name")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::LogicalOperator;
    use serde_json::json;

    fn deserialize(json: &Json) -> Result<LogicalPlanNode> {
        PlanDeserializer::new().deserialize_value(json)
    }

    fn people_scan() -> Json {
        json!({
            "op": "scan",
            "source": "people",
            "schema": [
                {"name": "id", "type": "int64", "nullable": false},
                {"name": "name", "type": "string"},
                {"name": "age", "type": "int64"}
            ]
        })
    }

    fn schema_error(result: Result<LogicalPlanNode>) -> (String, String) {
        match result {
            Err(VexelError::PlanSchema { path, message }) => (path, message),
            other => panic!("expected a plan schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_filter_over_scan() {
        let plan = deserialize(&json!({
            "op": "filter",
            "input": people_scan(),
            "predicate": {"call": "gt", "args": [{"column": "age"}, {"literal": 30}]}
        }))
        .unwrap();
        assert_eq!(plan.id(), "filter@$");
        assert_eq!(plan.children()[0].id(), "scan@$.input");
        assert_eq!(plan.schema().names(), vec!["id", "name", "age"]);
    }

    #[test]
    fn test_explicit_id_is_kept() {
        let mut scan = people_scan();
        scan["id"] = json!("people_scan");
        let plan = deserialize(&scan).unwrap();
        assert_eq!(plan.id(), "people_scan");
    }

    #[test]
    fn test_unknown_operator_kind() {
        let (path, message) = schema_error(deserialize(&json!({"op": "frobnicate"})));
        assert_eq!(path, "$.op");
        assert!(message.contains("frobnicate"));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = PlanDeserializer::new().deserialize("{\"op\": ").unwrap_err();
        assert!(matches!(err, VexelError::PlanParse { line: 1, .. }));
    }

    #[test]
    fn test_argument_type_error_path() {
        let (path, _) = schema_error(deserialize(&json!({
            "op": "filter",
            "input": people_scan(),
            "predicate": {"call": "gt", "args": [{"column": "age"}, {"call": "add", "args": [{"column": "age"}, {"column": "name"}]}]}
        })));
        assert_eq!(path, "$.predicate.args[1].args[1]");
    }

    #[test]
    fn test_unresolved_column() {
        let (path, message) = schema_error(deserialize(&json!({
            "op": "project",
            "input": people_scan(),
            "exprs": [{"name": "x", "expr": {"column": "salary"}}]
        })));
        assert_eq!(path, "$.exprs[0].expr");
        assert!(message.contains("salary"));
    }

    #[test]
    fn test_non_boolean_predicate() {
        let (path, _) = schema_error(deserialize(&json!({
            "op": "filter",
            "input": people_scan(),
            "predicate": {"column": "age"}
        })));
        assert_eq!(path, "$.predicate");
    }

    #[test]
    fn test_duplicate_project_names() {
        let (path, message) = schema_error(deserialize(&json!({
            "op": "project",
            "input": people_scan(),
            "exprs": [
                {"name": "a", "expr": {"column": "age"}},
                {"name": "a", "expr": {"column": "id"}}
            ]
        })));
        assert_eq!(path, "$.exprs");
        assert!(message.contains("duplicate"));
    }

    #[test]
    fn test_negative_limit() {
        let (path, _) = schema_error(deserialize(&json!({
            "op": "limit",
            "input": people_scan(),
            "fetch": -1
        })));
        assert_eq!(path, "$.fetch");
    }

    #[test]
    fn test_declared_schema_mismatch() {
        let (path, _) = schema_error(deserialize(&json!({
            "op": "project",
            "input": people_scan(),
            "exprs": [{"name": "age2", "expr": {"call": "mul", "args": [{"column": "age"}, {"literal": 2.0}]}}],
            "schema": [{"name": "age2", "type": "int64"}]
        })));
        assert_eq!(path, "$.schema[0]");
    }

    #[test]
    fn test_declared_schema_match() {
        let plan = deserialize(&json!({
            "op": "project",
            "input": people_scan(),
            "exprs": [{"name": "id", "expr": {"column": 0}}],
            "schema": [{"name": "id", "type": "int64"}]
        }))
        .unwrap();
        assert!(!plan.schema().column(0).unwrap().nullable);
    }

    #[test]
    fn test_values_null_in_non_nullable_column() {
        let (path, _) = schema_error(deserialize(&json!({
            "op": "values",
            "schema": [{"name": "a", "type": "int64", "nullable": false}],
            "rows": [[1], [null]]
        })));
        assert_eq!(path, "$.rows[1][0]");
    }

    #[test]
    fn test_values_typed_cells() {
        let plan = deserialize(&json!({
            "op": "values",
            "schema": [{"name": "d", "type": "date"}, {"name": "x", "type": "float64"}],
            "rows": [["1970-01-11", 1], [null, 2.5]]
        }))
        .unwrap();
        let LogicalOperator::Values { rows, .. } = plan.operator() else {
            panic!("expected values");
        };
        assert_eq!(rows[0], vec![Value::Date(10), Value::Float64(1.0)]);
        assert_eq!(rows[1][0], Value::Null);
    }

    #[test]
    fn test_join_keys_are_coerced() {
        let plan = deserialize(&json!({
            "op": "join",
            "left": people_scan(),
            "right": {
                "op": "values",
                "schema": [{"name": "score", "type": "float64"}],
                "rows": [[1.0]]
            },
            "join_type": "left",
            "on": [{"left": {"column": "age"}, "right": {"column": "score"}}]
        }))
        .unwrap();
        let LogicalOperator::Join { on, join_type, .. } = plan.operator() else {
            panic!("expected join");
        };
        assert_eq!(*join_type, JoinType::Left);
        assert_eq!(on[0].0.data_type(), DataType::Float64);
        assert!(plan.schema().column(3).unwrap().nullable);
    }

    #[test]
    fn test_join_filter_sees_both_sides() {
        let result = deserialize(&json!({
            "op": "join",
            "left": people_scan(),
            "right": {
                "op": "values",
                "schema": [{"name": "limit_age", "type": "int64"}],
                "rows": [[40]]
            },
            "filter": {"call": "lt", "args": [{"column": "age"}, {"column": "limit_age"}]}
        }));
        assert!(result.is_ok());
    }

    #[test]
    fn test_scan_without_schema_uses_catalog() {
        use crate::catalog::MemTable;
        use std::sync::Arc;

        let catalog = Catalog::new();
        let schema = Schema::new(vec![ColumnDef::new("x", DataType::Int64)]);
        catalog
            .register("t", Arc::new(MemTable::from_rows(schema, &[]).unwrap()))
            .unwrap();
        let scan = json!({"op": "scan", "source": "t"});
        let plan = PlanDeserializer::new()
            .with_catalog(&catalog)
            .deserialize_value(&scan)
            .unwrap();
        assert_eq!(plan.schema().names(), vec!["x"]);

        let (path, _) = schema_error(deserialize(&scan));
        assert_eq!(path, "$");
    }

    #[test]
    fn test_aggregate_requires_output() {
        let (path, _) = schema_error(deserialize(&json!({
            "op": "aggregate",
            "input": people_scan()
        })));
        assert_eq!(path, "$");
    }

    #[test]
    fn test_aggregate_argument_type_error() {
        let (path, _) = schema_error(deserialize(&json!({
            "op": "aggregate",
            "input": people_scan(),
            "aggregates": [{"name": "s", "function": "sum", "arg": {"column": "name"}}]
        })));
        assert_eq!(path, "$.aggregates[0].arg");
    }

    #[test]
    fn test_csv_scan_source() {
        let plan = deserialize(&json!({
            "op": "scan",
            "source": {"csv": "data/people.csv", "delimiter": ";", "dictionary_columns": ["name"]},
            "schema": [{"name": "name", "type": "string"}]
        }))
        .unwrap();
        let LogicalOperator::Scan { source, .. } = plan.operator() else {
            panic!("expected scan");
        };
        let ScanSource::Csv { path, options } = source else {
            panic!("expected csv source");
        };
        assert_eq!(path, &PathBuf::from("data/people.csv"));
        assert_eq!(options.delimiter, ';');
        assert!(options.header);
    }
}
