//! The evaluator boundary and in-memory data sources.
//!
//! Expressions are compiled elsewhere; the engine only sees dense integer ids
//! and asks for a value under one of three passes.

use crate::error::FillError;
use crate::value::{Value, ValueOrder};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpressionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluationPass {
    /// Values of the current record.
    Current,
    /// Values of the previous record; group footers are evaluated with these.
    Old,
    /// Forward-looking estimate; in-memory sources answer with current values.
    Estimated,
}

pub trait Evaluator {
    fn evaluate(&self, id: ExpressionId, pass: EvaluationPass) -> Result<Value, FillError>;

    fn evaluate_current(&self, id: ExpressionId) -> Result<Value, FillError> {
        self.evaluate(id, EvaluationPass::Current)
    }

    fn evaluate_old(&self, id: ExpressionId) -> Result<Value, FillError> {
        self.evaluate(id, EvaluationPass::Old)
    }

    fn evaluate_estimated(&self, id: ExpressionId) -> Result<Value, FillError> {
        self.evaluate(id, EvaluationPass::Estimated)
    }
}

/// A record stream. The source is also the evaluator of its own records.
pub trait DataSource: Evaluator + Send {
    /// Advances to the next record. Returns `false` once exhausted; the last
    /// record stays current after that.
    fn next(&mut self) -> Result<bool, FillError>;

    fn rewind(&mut self) -> Result<(), FillError>;

    /// Zero-based index of the current record, `None` before the first `next`.
    fn record_index(&self) -> Option<usize>;
}

/// Creates a data source per master record, e.g. for a list component.
pub trait DataSourceFactory: Send + Sync {
    fn create(&self, parent: &dyn Evaluator) -> Result<Box<dyn DataSource>, FillError>;
}

/// Borrowed data source seen through its evaluator face.
pub(crate) struct SourceEvaluator<'a>(pub &'a dyn DataSource);

impl Evaluator for SourceEvaluator<'_> {
    fn evaluate(&self, id: ExpressionId, pass: EvaluationPass) -> Result<Value, FillError> {
        self.0.evaluate(id, pass)
    }
}

/// Evaluator that answers `Null` for everything; used before any record exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEvaluator;

impl Evaluator for NullEvaluator {
    fn evaluate(&self, _id: ExpressionId, _pass: EvaluationPass) -> Result<Value, FillError> {
        Ok(Value::Null)
    }
}

/// One record as seen by a computed expression.
pub struct RecordView<'a> {
    pub index: usize,
    pub fields: &'a [Value],
}

impl RecordView<'_> {
    pub fn field(&self, index: usize) -> &Value {
        self.fields.get(index).unwrap_or(&Value::Null)
    }
}

pub type ComputedExpression =
    Arc<dyn Fn(&RecordView<'_>) -> Result<Value, FillError> + Send + Sync>;

/// Records held in memory. Expression `n` reads field `n` unless a computed
/// expression is registered for it.
#[derive(Clone)]
pub struct MemoryDataSource {
    records: Arc<Vec<Vec<Value>>>,
    computed: HashMap<ExpressionId, ComputedExpression>,
    current: Option<usize>,
    previous: Option<usize>,
}

impl MemoryDataSource {
    pub fn new(records: Vec<Vec<Value>>) -> Self {
        Self::shared(Arc::new(records))
    }

    pub fn shared(records: Arc<Vec<Vec<Value>>>) -> Self {
        Self {
            records,
            computed: HashMap::new(),
            current: None,
            previous: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_expression<F>(mut self, id: ExpressionId, expression: F) -> Self
    where
        F: Fn(&RecordView<'_>) -> Result<Value, FillError> + Send + Sync + 'static,
    {
        self.computed.insert(id, Arc::new(expression));
        self
    }

    pub(crate) fn with_computed(
        mut self,
        computed: &HashMap<ExpressionId, ComputedExpression>,
    ) -> Self {
        self.computed
            .extend(computed.iter().map(|(id, expr)| (*id, expr.clone())));
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sorts records by the given fields, ascending. Values without a natural
    /// order are ordered by first observation.
    pub fn sort_by_fields(&mut self, fields: &[usize]) -> Result<(), FillError> {
        let mut order = ValueOrder::new();
        let mut failure = None;
        let mut records = self.records.as_ref().clone();
        records.sort_by(|a, b| {
            for field in fields {
                let left = a.get(*field).unwrap_or(&Value::Null);
                let right = b.get(*field).unwrap_or(&Value::Null);
                match order.compare(left, right) {
                    Ok(std::cmp::Ordering::Equal) => continue,
                    Ok(other) => return other,
                    Err(err) => {
                        failure.get_or_insert(err);
                        return std::cmp::Ordering::Equal;
                    }
                }
            }
            std::cmp::Ordering::Equal
        });
        order.end_pass();
        if let Some(err) = failure {
            return Err(err);
        }
        self.records = Arc::new(records);
        self.current = None;
        self.previous = None;
        Ok(())
    }

    fn value_at(&self, record: Option<usize>, id: ExpressionId) -> Result<Value, FillError> {
        let Some(index) = record else {
            return Ok(Value::Null);
        };
        let fields = self
            .records
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if let Some(expression) = self.computed.get(&id) {
            return expression(&RecordView { index, fields });
        }
        match fields.get(id.0 as usize) {
            Some(value) => Ok(value.clone()),
            None => Err(FillError::evaluation(
                id.0,
                format!("record {index} has no field {}", id.0),
            )),
        }
    }
}

impl Evaluator for MemoryDataSource {
    fn evaluate(&self, id: ExpressionId, pass: EvaluationPass) -> Result<Value, FillError> {
        match pass {
            EvaluationPass::Current | EvaluationPass::Estimated => self.value_at(self.current, id),
            EvaluationPass::Old => self.value_at(self.previous, id),
        }
    }
}

impl DataSource for MemoryDataSource {
    fn next(&mut self) -> Result<bool, FillError> {
        let next = self.current.map_or(0, |index| index + 1);
        if next < self.records.len() {
            self.previous = self.current;
            self.current = Some(next);
            Ok(true)
        } else {
            // exhausted: old and current both point at the last record
            self.previous = self.current;
            Ok(false)
        }
    }

    fn rewind(&mut self) -> Result<(), FillError> {
        self.current = None;
        self.previous = None;
        Ok(())
    }

    fn record_index(&self) -> Option<usize> {
        self.current
    }
}

/// Hands out fresh cursors over the same shared records.
#[derive(Clone)]
pub struct StaticDataSourceFactory {
    records: Arc<Vec<Vec<Value>>>,
    computed: HashMap<ExpressionId, ComputedExpression>,
}

impl StaticDataSourceFactory {
    pub fn new(records: Vec<Vec<Value>>) -> Self {
        Self {
            records: Arc::new(records),
            computed: HashMap::new(),
        }
    }

    pub fn with_expression<F>(mut self, id: ExpressionId, expression: F) -> Self
    where
        F: Fn(&RecordView<'_>) -> Result<Value, FillError> + Send + Sync + 'static,
    {
        self.computed.insert(id, Arc::new(expression));
        self
    }
}

impl DataSourceFactory for StaticDataSourceFactory {
    fn create(&self, _parent: &dyn Evaluator) -> Result<Box<dyn DataSource>, FillError> {
        Ok(Box::new(
            MemoryDataSource::shared(self.records.clone()).with_computed(&self.computed),
        ))
    }
}

/// Rows come from a parent expression evaluating to a list of lists.
#[derive(Clone)]
pub struct NestedDataSourceFactory {
    rows: ExpressionId,
    computed: HashMap<ExpressionId, ComputedExpression>,
}

impl NestedDataSourceFactory {
    pub fn new(rows: ExpressionId) -> Self {
        Self {
            rows,
            computed: HashMap::new(),
        }
    }

    pub fn with_expression<F>(mut self, id: ExpressionId, expression: F) -> Self
    where
        F: Fn(&RecordView<'_>) -> Result<Value, FillError> + Send + Sync + 'static,
    {
        self.computed.insert(id, Arc::new(expression));
        self
    }
}

impl DataSourceFactory for NestedDataSourceFactory {
    fn create(&self, parent: &dyn Evaluator) -> Result<Box<dyn DataSource>, FillError> {
        let value = parent.evaluate_current(self.rows)?;
        let records = match value {
            Value::Null => Vec::new(),
            Value::List(rows) => rows
                .into_iter()
                .map(|row| match row {
                    Value::List(fields) => Ok(fields),
                    other => Err(FillError::evaluation(
                        self.rows.0,
                        format!("expected a list row, got {other:?}"),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => {
                return Err(FillError::evaluation(
                    self.rows.0,
                    format!("expected a list of rows, got {other:?}"),
                ));
            }
        };
        Ok(Box::new(
            MemoryDataSource::new(records).with_computed(&self.computed),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> MemoryDataSource {
        MemoryDataSource::new(vec![
            vec!["ada".into(), Value::Int(36)],
            vec!["bob".into(), Value::Int(41)],
        ])
    }

    #[test]
    fn old_pass_reads_previous_record() {
        let mut source = people();
        assert_eq!(source.evaluate_current(ExpressionId(0)).unwrap(), Value::Null);
        assert!(source.next().unwrap());
        assert!(source.evaluate_old(ExpressionId(0)).unwrap().is_null());
        assert!(source.next().unwrap());
        assert_eq!(source.evaluate_current(ExpressionId(0)).unwrap(), "bob".into());
        assert_eq!(source.evaluate_old(ExpressionId(0)).unwrap(), "ada".into());
    }

    #[test]
    fn exhaustion_keeps_last_record_current() {
        let mut source = people();
        while source.next().unwrap() {}
        assert_eq!(source.record_index(), Some(1));
        assert_eq!(source.evaluate_current(ExpressionId(1)).unwrap(), Value::Int(41));
        assert_eq!(source.evaluate_old(ExpressionId(1)).unwrap(), Value::Int(41));
        source.rewind().unwrap();
        assert_eq!(source.record_index(), None);
    }

    #[test]
    fn computed_expressions_and_missing_fields() {
        let mut source = people().with_expression(ExpressionId(7), |record| {
            Ok(Value::Int(record.field(1).as_i64().unwrap_or(0) * 2))
        });
        source.next().unwrap();
        assert_eq!(source.evaluate_current(ExpressionId(7)).unwrap(), Value::Int(72));
        let err = source.evaluate_current(ExpressionId(3)).unwrap_err();
        assert!(matches!(err, FillError::Evaluation { expression: 3, .. }));
    }

    #[test]
    fn sort_by_fields_orders_records() {
        let mut source = MemoryDataSource::new(vec![
            vec![Value::Int(3)],
            vec![Value::Null],
            vec![Value::Int(1)],
        ]);
        source.sort_by_fields(&[0]).unwrap();
        let mut seen = Vec::new();
        while source.next().unwrap() {
            seen.push(source.evaluate_current(ExpressionId(0)).unwrap());
        }
        assert_eq!(seen, vec![Value::Null, Value::Int(1), Value::Int(3)]);
    }

    #[test]
    fn nested_factory_reads_rows_from_parent() {
        let parent = MemoryDataSource::new(vec![vec![Value::List(vec![
            Value::List(vec!["x".into()]),
            Value::List(vec!["y".into()]),
        ])]]);
        let mut parent = parent;
        parent.next().unwrap();
        let factory = NestedDataSourceFactory::new(ExpressionId(0));
        let mut child = factory.create(&parent).unwrap();
        assert!(child.next().unwrap());
        assert!(child.next().unwrap());
        assert!(!child.next().unwrap());
        assert_eq!(child.evaluate_current(ExpressionId(0)).unwrap(), "y".into());
    }
}
