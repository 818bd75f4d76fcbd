//! Filter compilation and statistics-driven pruning.
//!
//! A [`FilterExpr`] is compiled into simple per-column [`Constraint`]s by
//! walking the AND spine of the expression; anything else stays behind as
//! a residual the reader re-evaluates per feature. Under-translation is
//! always safe: constraints can only reject rows the full predicate would
//! reject too.
//!
//! Unit pruning follows the same rule: a unit (row group / batch) is
//! skipped only when some constraint proves no row can match, and absent
//! statistics always degrade to a full scan, never to a missed row.

use crate::feature::Feature;
use crate::geometry::Envelope;
use crate::schema::ColumnSchema;
use crate::value::FieldValue;

/// Comparison operator of a filter leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Mirror the operator for a literal appearing on the left-hand side:
    /// `5 < col` means `col > 5`.
    pub fn swapped(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            other => other,
        }
    }

    fn matches(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ordering == Equal,
            CompareOp::Ne => ordering != Equal,
            CompareOp::Lt => ordering == Less,
            CompareOp::Le => ordering != Greater,
            CompareOp::Gt => ordering == Greater,
            CompareOp::Ge => ordering != Less,
        }
    }
}

/// One side of a comparison leaf.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A field referenced by name (regular field or the FID column)
    Field(String),
    Literal(FieldValue),
}

/// Attribute filter expression tree.
#[derive(Debug, Clone)]
pub enum FilterExpr {
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    Compare {
        op: CompareOp,
        left: Operand,
        right: Operand,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
}

/// Field operand shorthand.
pub fn col(name: &str) -> Operand {
    Operand::Field(name.to_string())
}

/// Literal operand shorthand.
pub fn lit<V: Into<FieldValue>>(value: V) -> Operand {
    Operand::Literal(value.into())
}

impl FilterExpr {
    pub fn and(self, other: FilterExpr) -> FilterExpr {
        FilterExpr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: FilterExpr) -> FilterExpr {
        FilterExpr::Or(Box::new(self), Box::new(other))
    }

    pub fn not(self) -> FilterExpr {
        FilterExpr::Not(Box::new(self))
    }

    pub fn compare(op: CompareOp, left: Operand, right: Operand) -> FilterExpr {
        FilterExpr::Compare { op, left, right }
    }

    pub fn eq(left: Operand, right: Operand) -> FilterExpr {
        Self::compare(CompareOp::Eq, left, right)
    }

    pub fn is_null(operand: Operand) -> FilterExpr {
        FilterExpr::IsNull {
            operand,
            negated: false,
        }
    }

    pub fn is_not_null(operand: Operand) -> FilterExpr {
        FilterExpr::IsNull {
            operand,
            negated: true,
        }
    }
}

/// What a compiled constraint targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintTarget {
    /// Index into `ColumnSchema::fields`
    Field(usize),
    /// The feature id (explicit FID column or positional id)
    Fid,
}

/// Operator of a compiled constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Compare(CompareOp),
    IsNull,
    IsNotNull,
}

/// A pushed-down filter leaf: one field, one operator, one literal.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub target: ConstraintTarget,
    pub op: ConstraintOp,
    pub literal: Option<FieldValue>,
}

/// Result of filter compilation.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    pub constraints: Vec<Constraint>,
    /// When false, the residual expression must still be evaluated
    /// against every materialized feature.
    pub fully_translated: bool,
}

/// Compile a filter into per-column constraints.
///
/// Only AND chains of `column <op> literal` / `IS [NOT] NULL` leaves are
/// translated; OR, NOT, functions and column-to-column comparisons make
/// the result partial (`fully_translated == false`).
pub fn compile(expr: &FilterExpr, schema: &ColumnSchema) -> CompiledFilter {
    let mut compiled = CompiledFilter {
        constraints: Vec::new(),
        fully_translated: true,
    };
    explore(expr, schema, &mut compiled);
    compiled
}

fn resolve_target(name: &str, schema: &ColumnSchema) -> Option<ConstraintTarget> {
    if let Some((fid_name, _)) = &schema.fid_column {
        if fid_name == name {
            return Some(ConstraintTarget::Fid);
        }
    }
    schema.field_index(name).map(ConstraintTarget::Field)
}

fn explore(expr: &FilterExpr, schema: &ColumnSchema, out: &mut CompiledFilter) {
    match expr {
        FilterExpr::And(left, right) => {
            explore(left, schema, out);
            explore(right, schema, out);
        }
        FilterExpr::Compare { op, left, right } => {
            let (name, literal, op) = match (left, right) {
                (Operand::Field(name), Operand::Literal(value)) => (name, value, *op),
                (Operand::Literal(value), Operand::Field(name)) => (name, value, op.swapped()),
                _ => {
                    out.fully_translated = false;
                    return;
                }
            };
            match resolve_target(name, schema) {
                Some(target) => out.constraints.push(Constraint {
                    target,
                    op: ConstraintOp::Compare(op),
                    literal: Some(literal.clone()),
                }),
                None => out.fully_translated = false,
            }
        }
        FilterExpr::IsNull { operand, negated } => {
            let Operand::Field(name) = operand else {
                out.fully_translated = false;
                return;
            };
            match resolve_target(name, schema) {
                Some(target) => out.constraints.push(Constraint {
                    target,
                    op: if *negated {
                        ConstraintOp::IsNotNull
                    } else {
                        ConstraintOp::IsNull
                    },
                    literal: None,
                }),
                None => out.fully_translated = false,
            }
        }
        FilterExpr::Or(_, _) | FilterExpr::Not(_) => {
            out.fully_translated = false;
        }
    }
}

/// Evaluate one constraint against a concrete value (`None` = null).
pub fn constraint_matches(constraint: &Constraint, value: Option<&FieldValue>) -> bool {
    match constraint.op {
        ConstraintOp::IsNull => value.is_none_or(FieldValue::is_null),
        ConstraintOp::IsNotNull => value.is_some_and(|v| !v.is_null()),
        ConstraintOp::Compare(op) => {
            let Some(value) = value.filter(|v| !v.is_null()) else {
                return false;
            };
            let Some(literal) = &constraint.literal else {
                return false;
            };
            match value.partial_cmp_value(literal) {
                Some(ordering) => op.matches(ordering),
                None => false,
            }
        }
    }
}

/// Evaluate the full expression against a materialized feature (residual
/// evaluation). Null comparisons are false, as in the compiled path.
pub fn evaluate(expr: &FilterExpr, feature: &Feature, schema: &ColumnSchema) -> bool {
    match expr {
        FilterExpr::And(left, right) => {
            evaluate(left, feature, schema) && evaluate(right, feature, schema)
        }
        FilterExpr::Or(left, right) => {
            evaluate(left, feature, schema) || evaluate(right, feature, schema)
        }
        FilterExpr::Not(inner) => !evaluate(inner, feature, schema),
        FilterExpr::Compare { op, left, right } => {
            let (a, b) = (
                operand_value(left, feature, schema),
                operand_value(right, feature, schema),
            );
            match (a, b) {
                (Some(a), Some(b)) if !a.is_null() && !b.is_null() => {
                    a.partial_cmp_value(&b).map(|o| op.matches(o)).unwrap_or(false)
                }
                _ => false,
            }
        }
        FilterExpr::IsNull { operand, negated } => {
            let value = operand_value(operand, feature, schema);
            let is_null = value.map(|v| v.is_null()).unwrap_or(true);
            is_null != *negated
        }
    }
}

fn operand_value(
    operand: &Operand,
    feature: &Feature,
    schema: &ColumnSchema,
) -> Option<FieldValue> {
    match operand {
        Operand::Literal(value) => Some(value.clone()),
        Operand::Field(name) => {
            if let Some((fid_name, _)) = &schema.fid_column {
                if fid_name == name {
                    return Some(FieldValue::Int64(feature.fid));
                }
            }
            schema
                .field_index(name)
                .and_then(|i| feature.fields.get(i).cloned())
        }
    }
}

/// Collect every field name the expression references.
pub fn referenced_fields(expr: &FilterExpr, out: &mut Vec<String>) {
    match expr {
        FilterExpr::And(left, right) | FilterExpr::Or(left, right) => {
            referenced_fields(left, out);
            referenced_fields(right, out);
        }
        FilterExpr::Not(inner) => referenced_fields(inner, out),
        FilterExpr::Compare { left, right, .. } => {
            for operand in [left, right] {
                if let Operand::Field(name) = operand {
                    out.push(name.clone());
                }
            }
        }
        FilterExpr::IsNull { operand, .. } => {
            if let Operand::Field(name) = operand {
                out.push(name.clone());
            }
        }
    }
}

/// Per-unit min/max/null-count statistics for one column.
#[derive(Debug, Clone, Default)]
pub struct ColumnStats {
    pub min: Option<FieldValue>,
    pub max: Option<FieldValue>,
    pub null_count: Option<u64>,
    pub row_count: u64,
}

/// Geometry statistics for one unit: bounding box and observed types.
#[derive(Debug, Clone, Default)]
pub struct GeomStats {
    pub bbox: Option<Envelope>,
}

/// Tri-state answer of a statistics test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitMatch {
    /// Some row of the unit may satisfy the constraint
    Yes,
    /// No row of the unit can satisfy the constraint
    No,
    /// Statistics are missing or not comparable; the unit must be scanned
    Unknown,
}

/// Decide from per-unit statistics whether any row could satisfy the
/// constraint. Statistics comparisons go through the widened numeric
/// view (or lexicographic order for strings); incomparable kinds are
/// `Unknown`, never `No`.
pub fn unit_match(stats: Option<&ColumnStats>, constraint: &Constraint) -> UnitMatch {
    use std::cmp::Ordering::*;

    let Some(stats) = stats else {
        return UnitMatch::Unknown;
    };
    match constraint.op {
        ConstraintOp::IsNull => match stats.null_count {
            Some(0) => UnitMatch::No,
            Some(_) => UnitMatch::Yes,
            None => UnitMatch::Unknown,
        },
        ConstraintOp::IsNotNull => match stats.null_count {
            Some(n) if n == stats.row_count => UnitMatch::No,
            Some(_) => UnitMatch::Yes,
            None => UnitMatch::Unknown,
        },
        ConstraintOp::Compare(op) => {
            let Some(literal) = &constraint.literal else {
                return UnitMatch::Unknown;
            };
            // literal vs min, literal vs max
            let cmp_min = stats
                .min
                .as_ref()
                .and_then(|min| literal.partial_cmp_value(min));
            let cmp_max = stats
                .max
                .as_ref()
                .and_then(|max| literal.partial_cmp_value(max));
            match op {
                CompareOp::Eq => match (cmp_min, cmp_max) {
                    (Some(Less), _) | (_, Some(Greater)) => UnitMatch::No,
                    (Some(_), Some(_)) => UnitMatch::Yes,
                    _ => UnitMatch::Unknown,
                },
                CompareOp::Ne => match (cmp_min, cmp_max) {
                    (Some(Equal), Some(Equal)) => UnitMatch::No,
                    (Some(_), Some(_)) => UnitMatch::Yes,
                    _ => UnitMatch::Unknown,
                },
                // col < lit: impossible iff lit <= min
                CompareOp::Lt => match cmp_min {
                    Some(Less) | Some(Equal) => UnitMatch::No,
                    Some(Greater) => UnitMatch::Yes,
                    None => UnitMatch::Unknown,
                },
                // col <= lit: impossible iff lit < min
                CompareOp::Le => match cmp_min {
                    Some(Less) => UnitMatch::No,
                    Some(_) => UnitMatch::Yes,
                    None => UnitMatch::Unknown,
                },
                // col > lit: impossible iff lit >= max
                CompareOp::Gt => match cmp_max {
                    Some(Greater) | Some(Equal) => UnitMatch::No,
                    Some(Less) => UnitMatch::Yes,
                    None => UnitMatch::Unknown,
                },
                // col >= lit: impossible iff lit > max
                CompareOp::Ge => match cmp_max {
                    Some(Greater) => UnitMatch::No,
                    Some(_) => UnitMatch::Yes,
                    None => UnitMatch::Unknown,
                },
            }
        }
    }
}

/// Spatial pruning of a whole unit: skip only when a bbox is known and
/// provably disjoint from the filter envelope.
pub fn unit_bbox_match(unit_bbox: Option<&Envelope>, filter: &Envelope) -> UnitMatch {
    match unit_bbox {
        Some(bbox) if bbox.is_initialized() => {
            if bbox.intersects(filter) {
                UnitMatch::Yes
            } else {
                UnitMatch::No
            }
        }
        _ => UnitMatch::Unknown,
    }
}

/// One selected unit in the sparse row remapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBreak {
    /// Rows selected before this unit
    pub selected_before: i64,
    /// Original global row offset of the unit's first row
    pub original_start: i64,
    /// Row count of the unit
    pub rows: i64,
}

/// Sparse (selected-count, original-offset) breakpoint table keeping
/// FID/global-index semantics stable when units are skipped. Consulted
/// with a monotonic cursor during iteration.
#[derive(Debug, Clone, Default)]
pub struct RowRemap {
    breaks: Vec<RowBreak>,
    cursor: usize,
}

impl RowRemap {
    pub fn new(breaks: Vec<RowBreak>) -> Self {
        RowRemap { breaks, cursor: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.breaks.is_empty()
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Total selected rows.
    pub fn selected_rows(&self) -> i64 {
        self.breaks
            .last()
            .map(|b| b.selected_before + b.rows)
            .unwrap_or(0)
    }

    /// Map a selected-row index to its original global row index. The
    /// cursor only moves forward; callers iterate in order and call
    /// [`RowRemap::reset_cursor`] on reset.
    pub fn original_index(&mut self, selected_idx: i64) -> Option<i64> {
        if selected_idx < 0 {
            return None;
        }
        while let Some(b) = self.breaks.get(self.cursor) {
            if selected_idx < b.selected_before {
                // went backwards relative to the cursor; rewind once
                self.cursor = 0;
                continue;
            }
            if selected_idx < b.selected_before + b.rows {
                return Some(b.original_start + (selected_idx - b.selected_before));
            }
            self.cursor += 1;
        }
        None
    }

    /// Map an original global row index back to a selected-row index;
    /// `None` when it falls inside a skipped unit.
    pub fn selected_index(&self, original_idx: i64) -> Option<i64> {
        let slot = self
            .breaks
            .partition_point(|b| b.original_start + b.rows <= original_idx);
        let b = self.breaks.get(slot)?;
        if original_idx < b.original_start {
            return None;
        }
        Some(b.selected_before + (original_idx - b.original_start))
    }
}
