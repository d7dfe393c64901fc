//! Query compilation and execution.
//!
//! [`QueryCompiler`] ties the pipeline together: parameterize the query
//! model, look its shape up in the [`CompilationCache`], translate and render
//! on a miss. The result is a [`PreparedQuery`], which binds parameter
//! values and runs the commands through a [`CommandExecutor`], yielding
//! shaped rows lazily as [`QueryResults`].

use crate::cache::{CacheConfig, CacheKey, CacheStats, CompilationCache};
use crate::error::{Diagnostic, RelqError, RelqResult};
use crate::eval::{EvalEnv, Evaluator, HostFunctions};
use crate::expr::ExprRef;
use crate::executor::{CommandExecutor, RowCursor};
use crate::metadata::Model;
use crate::parser;
use crate::query::{QueryModel, parameterize};
use crate::shaper::{Shaped, Shaper, check_columns};
use crate::sql::{Command, Select};
use crate::tracking::UnitOfWork;
use crate::transpiler::{Dialect, SqlGenerator};
use crate::translator::TranslatorRegistry;
use crate::value::{Value, ValueBuffer, ValueType};
use crate::visitor::{ClientEvaluation, ClientStage, QueryModelVisitor, Terminal, Translation};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Compilation settings that take part in the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub client_evaluation: ClientEvaluation,
    /// Lift literal constants into parameters so queries differing only in
    /// literal values share one compiled entry.
    pub parameterize_literals: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            client_evaluation: ClientEvaluation::default(),
            parameterize_literals: true,
        }
    }
}

/// A translated and rendered query shape.
#[derive(Debug)]
pub struct CompiledQuery {
    pub dialect: Arc<str>,
    pub command: Command,
    /// One per `translation.splits` entry, in the same order.
    pub split_commands: Vec<Command>,
    pub translation: Translation,
}

impl CompiledQuery {
    pub fn select(&self) -> &Select {
        &self.translation.select
    }

    pub fn shaper(&self) -> &Shaper {
        &self.translation.shaper
    }

    pub fn terminal(&self) -> &Terminal {
        &self.translation.terminal
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.translation.diagnostics
    }

    /// Every command in execution order; split commands run first.
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.split_commands
            .iter()
            .chain(std::iter::once(&self.command))
    }
}

/// Named parameter values supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: HashMap<Arc<str>, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k.as_ref(), v);
        }
        params
    }
}

/// Every parameter value of one execution, by name.
#[derive(Debug, Clone, Default)]
pub struct BoundParameters {
    values: HashMap<Arc<str>, Value>,
}

impl BoundParameters {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Values in the command's placeholder order.
    pub fn for_command(&self, command: &Command) -> RelqResult<Vec<Value>> {
        command
            .parameters
            .iter()
            .map(|name| {
                self.values
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RelqError::Binding(format!("No value for parameter '{}'", name)))
            })
            .collect()
    }
}

/// Compiles query models for one metadata model and dialect.
pub struct QueryCompiler {
    model: Arc<Model>,
    registry: Arc<TranslatorRegistry>,
    generator: Arc<dyn SqlGenerator>,
    host: Arc<HostFunctions>,
    cache: CompilationCache<Arc<CompiledQuery>>,
    options: CompileOptions,
}

impl fmt::Debug for QueryCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCompiler")
            .field("dialect", &self.generator.name())
            .field("model_version", &self.model.version())
            .field("options", &self.options)
            .field("cache", &self.cache.stats())
            .finish()
    }
}

impl QueryCompiler {
    pub fn new(model: Arc<Model>, dialect: Dialect) -> Self {
        Self {
            model,
            registry: Arc::new(TranslatorRegistry::with_defaults()),
            generator: dialect.generator(),
            host: Arc::new(HostFunctions::new()),
            cache: CompilationCache::new(CacheConfig::default()),
            options: CompileOptions::default(),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn SqlGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_registry(mut self, registry: TranslatorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_host_functions(mut self, host: HostFunctions) -> Self {
        self.host = Arc::new(host);
        self
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cache(mut self, config: CacheConfig) -> Self {
        self.cache = CompilationCache::new(config);
        self
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn generator(&self) -> &Arc<dyn SqlGenerator> {
        &self.generator
    }

    pub fn options(&self) -> CompileOptions {
        self.options
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Parse and compile a textual query.
    pub fn compile_text(&self, text: &str) -> RelqResult<PreparedQuery> {
        self.compile(&parser::parse(text)?)
    }

    /// Compile a query model, reusing a cached compilation of its shape.
    pub fn compile(&self, query: &QueryModel) -> RelqResult<PreparedQuery> {
        let parameterized = parameterize(query, self.options.parameterize_literals);
        let key = CacheKey {
            shape: parameterized.shape,
            model_version: self.model.version(),
            dialect: self.generator.name().into(),
            policy: self.options.client_evaluation,
            lift_literals: self.options.parameterize_literals,
        };
        let shape = key.shape.clone();
        let (compiled, cache_hit) = self
            .cache
            .get_or_try_insert_with(key, || self.compile_shape(&shape).map(Arc::new))?;
        Ok(PreparedQuery {
            compiled,
            literals: parameterized.values,
            host: self.host.clone(),
            model: self.model.clone(),
            cache_hit,
        })
    }

    /// Translate without caching or literal lifting.
    pub fn translate(&self, query: &QueryModel) -> RelqResult<Translation> {
        let evaluator = Evaluator::new(&self.host);
        QueryModelVisitor::new(
            &self.model,
            &self.registry,
            evaluator,
            self.options.client_evaluation,
        )
        .visit(query)
    }

    fn compile_shape(&self, shape: &QueryModel) -> RelqResult<CompiledQuery> {
        let translation = self.translate(shape)?;
        let command = self.generator.generate(&translation.select)?;
        let split_commands = translation
            .splits
            .iter()
            .map(|split| self.generator.generate(&split.select))
            .collect::<RelqResult<Vec<_>>>()?;

        for diagnostic in &translation.diagnostics {
            tracing::warn!("{}", diagnostic);
        }
        tracing::debug!(
            "Compiled {} for {}: {}",
            shape,
            self.generator.name(),
            command.text
        );

        Ok(CompiledQuery {
            dialect: self.generator.name().into(),
            command,
            split_commands,
            translation,
        })
    }
}

/// A compiled query plus the literal values of one particular call.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    compiled: Arc<CompiledQuery>,
    literals: Vec<(Arc<str>, Value)>,
    host: Arc<HostFunctions>,
    model: Arc<Model>,
    cache_hit: bool,
}

impl PreparedQuery {
    pub fn compiled(&self) -> &Arc<CompiledQuery> {
        &self.compiled
    }

    pub fn command(&self) -> &Command {
        &self.compiled.command
    }

    /// Literal values lifted out of the query, by generated parameter name.
    pub fn literals(&self) -> &[(Arc<str>, Value)] {
        &self.literals
    }

    pub fn is_cache_hit(&self) -> bool {
        self.cache_hit
    }

    /// Resolve every parameter: lifted literals, then caller values, then
    /// values computed in process from those two.
    pub fn bind(&self, params: &Params) -> RelqResult<BoundParameters> {
        let mut values: HashMap<Arc<str>, Value> = self.literals.iter().cloned().collect();
        for (name, value) in &params.values {
            values.insert(name.clone(), value.clone());
        }
        let evaluator = Evaluator::new(&self.host);
        for client in &self.compiled.translation.client_parameters {
            let value = evaluator.evaluate(&client.expr, &EvalEnv::new(&values))?;
            values.insert(client.name.clone(), value);
        }
        Ok(BoundParameters { values })
    }

    /// Start a materializer for one execution with a fresh unit of work.
    pub fn materializer(&self, bound: BoundParameters) -> RelqResult<Materializer> {
        Materializer::new(
            self.compiled.clone(),
            self.host.clone(),
            UnitOfWork::new(&self.model),
            bound,
        )
    }

    /// Run the query. Split commands are drained first; the root command's
    /// rows are then shaped one at a time as the results are pulled.
    pub fn execute<'e>(
        &self,
        executor: &'e mut dyn CommandExecutor,
        params: &Params,
    ) -> RelqResult<QueryResults<'e>> {
        let bound = self.bind(params)?;
        let mut materializer = self.materializer(bound)?;

        for (index, command) in self.compiled.split_commands.iter().enumerate() {
            let values = materializer.parameters().for_command(command)?;
            tracing::debug!("Executing split command: {}", command.text);
            let mut cursor = executor.execute(command, &values)?;
            while let Some(row) = cursor.next_row()? {
                materializer.accept_split(index, &row)?;
            }
        }

        let values = materializer.parameters().for_command(&self.compiled.command)?;
        tracing::debug!("Executing: {}", self.compiled.command.text);
        let cursor = executor.execute(&self.compiled.command, &values)?;
        Ok(QueryResults {
            cursor,
            materializer,
            finished: false,
        })
    }

    /// Run a query ending in a single-result operator.
    pub fn execute_scalar(
        &self,
        executor: &mut dyn CommandExecutor,
        params: &Params,
    ) -> RelqResult<(Shaped, UnitOfWork)> {
        self.execute(executor, params)?.finish()
    }
}

enum Stage {
    Skip(usize),
    Take(usize),
    Distinct(HashSet<Shaped>),
}

/// Row-at-a-time shaping state of one execution: the unit of work, post
/// filters and in-memory operators. Independent of where rows come from.
pub struct Materializer {
    compiled: Arc<CompiledQuery>,
    host: Arc<HostFunctions>,
    uow: UnitOfWork,
    parameters: BoundParameters,
    stages: Vec<Stage>,
    checked: bool,
    checked_splits: Vec<bool>,
    stopped: bool,
}

impl Materializer {
    pub fn new(
        compiled: Arc<CompiledQuery>,
        host: Arc<HostFunctions>,
        uow: UnitOfWork,
        parameters: BoundParameters,
    ) -> RelqResult<Self> {
        let evaluator = Evaluator::new(&host);
        let env = EvalEnv::new(&parameters.values);
        let count = |expr: &ExprRef| -> RelqResult<usize> {
            match evaluator.evaluate(expr, &env)? {
                Value::Int(n) => Ok(n.max(0) as usize),
                other => Err(RelqError::Binding(format!(
                    "row count must be an integer, got {}",
                    other
                ))),
            }
        };
        let mut stages = Vec::with_capacity(compiled.translation.client_stages.len());
        for stage in &compiled.translation.client_stages {
            stages.push(match stage {
                ClientStage::Skip(n) => Stage::Skip(count(n)?),
                ClientStage::Take(n) => Stage::Take(count(n)?),
                ClientStage::Distinct => Stage::Distinct(HashSet::new()),
            });
        }
        let checked_splits = vec![false; compiled.split_commands.len()];
        Ok(Self {
            compiled,
            host,
            uow,
            parameters,
            stages,
            checked: false,
            checked_splits,
            stopped: false,
        })
    }

    pub fn parameters(&self) -> &BoundParameters {
        &self.parameters
    }

    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.uow
    }

    pub fn into_unit_of_work(self) -> UnitOfWork {
        self.uow
    }

    /// True once no further row can produce a result.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Track the entities of one split command row.
    pub fn accept_split(&mut self, index: usize, row: &ValueBuffer) -> RelqResult<()> {
        let split = self
            .compiled
            .translation
            .splits
            .get(index)
            .ok_or_else(|| RelqError::Internal(format!("no split command {}", index)))?;
        if !self.checked_splits[index] {
            check_columns(split.select.projection.len(), row.len())?;
            self.checked_splits[index] = true;
        }
        split.shaper.shape(row, &mut self.uow)?;
        Ok(())
    }

    /// Shape one root row; `None` when a post filter or in-memory operator
    /// drops it.
    pub fn accept(&mut self, row: &ValueBuffer) -> RelqResult<Option<Shaped>> {
        if self.stopped {
            return Ok(None);
        }
        if !self.checked {
            check_columns(self.compiled.translation.select.projection.len(), row.len())?;
            self.checked = true;
        }
        let shaped = self.compiled.translation.shaper.shape(row, &mut self.uow)?;
        if !self.passes_post_filters(&shaped)? {
            return Ok(None);
        }
        Ok(self.admit(shaped))
    }

    fn passes_post_filters(&self, shaped: &Shaped) -> RelqResult<bool> {
        let filters = &self.compiled.translation.post_filters;
        if filters.is_empty() {
            return Ok(true);
        }
        let Shaped::Entity(id) = shaped else {
            return Err(RelqError::Internal(
                "post filter over a row that is not an entity".into(),
            ));
        };
        let evaluator = Evaluator::new(&self.host);
        let env = EvalEnv::new(&self.parameters.values).with_row(*id, &self.uow);
        for filter in filters {
            if !evaluator.predicate(filter, &env)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn admit(&mut self, shaped: Shaped) -> Option<Shaped> {
        let mut exhausted = false;
        for stage in &mut self.stages {
            match stage {
                Stage::Skip(n) if *n > 0 => {
                    *n -= 1;
                    return None;
                }
                Stage::Skip(_) => {}
                Stage::Take(0) => {
                    self.stopped = true;
                    return None;
                }
                Stage::Take(n) => {
                    *n -= 1;
                    exhausted |= *n == 0;
                }
                Stage::Distinct(seen) => {
                    if !seen.insert(shaped.clone()) {
                        return None;
                    }
                }
            }
        }
        if exhausted {
            self.stopped = true;
        }
        Some(shaped)
    }

    /// How many results the terminal operator needs, when bounded.
    pub fn needed(&self) -> Option<usize> {
        match self.compiled.translation.terminal {
            Terminal::First
            | Terminal::FirstOrDefault
            | Terminal::Single
            | Terminal::Exists
            | Terminal::Any => Some(1),
            _ => None,
        }
    }

    /// Apply the terminal operator to the accepted results.
    pub fn reduce(&self, items: Vec<Shaped>) -> RelqResult<Shaped> {
        let mut items = items.into_iter();
        match &self.compiled.translation.terminal {
            Terminal::Sequence => Err(RelqError::Internal(
                "query returns a sequence, not a single result".into(),
            )),
            Terminal::First => items.next().ok_or(RelqError::EmptySequence),
            Terminal::FirstOrDefault | Terminal::Single => Ok(items.next().unwrap_or(Shaped::Null)),
            Terminal::Exists | Terminal::Any => Ok(Shaped::Value(Value::Bool(items.next().is_some()))),
            Terminal::Count => Ok(Shaped::Value(Value::Int(items.count() as i64))),
            Terminal::Sum(selector) => {
                let values = self.selected(selector, items)?;
                let float = selector.ty().value_type() == Some(ValueType::Float)
                    || values.iter().any(|v| matches!(v, Value::Float(_)));
                if float {
                    let total: f64 = values.iter().filter_map(Value::as_f64).sum();
                    return Ok(Shaped::Value(Value::Float(total)));
                }
                let mut total: i64 = 0;
                for v in &values {
                    let n = v.as_i64().ok_or_else(|| {
                        RelqError::ClientEvaluation(format!("cannot sum {}", v))
                    })?;
                    total = total
                        .checked_add(n)
                        .ok_or_else(|| RelqError::ClientEvaluation("integer overflow".into()))?;
                }
                Ok(Shaped::Value(Value::Int(total)))
            }
            Terminal::Min(selector) | Terminal::Max(selector) => {
                let want = if matches!(self.compiled.translation.terminal, Terminal::Min(_)) {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                };
                let mut best: Option<Value> = None;
                for v in self.selected(selector, items)? {
                    best = match best {
                        Some(b) if v.compare(&b) != Some(want) => Some(b),
                        _ => Some(v),
                    };
                }
                Ok(best.map(Shaped::Value).unwrap_or(Shaped::Null))
            }
            Terminal::Average(selector) => {
                let values = self.selected(selector, items)?;
                if values.is_empty() {
                    return Ok(Shaped::Null);
                }
                let total: f64 = values.iter().filter_map(Value::as_f64).sum();
                Ok(Shaped::Value(Value::Float(total / values.len() as f64)))
            }
        }
    }

    /// Evaluate a reduction selector for each entity; NULLs are skipped.
    fn selected(
        &self,
        selector: &ExprRef,
        items: impl Iterator<Item = Shaped>,
    ) -> RelqResult<Vec<Value>> {
        let evaluator = Evaluator::new(&self.host);
        let mut values = Vec::new();
        for item in items {
            let Shaped::Entity(id) = item else {
                return Err(RelqError::Internal(
                    "in-memory aggregate over a row that is not an entity".into(),
                ));
            };
            let env = EvalEnv::new(&self.parameters.values).with_row(id, &self.uow);
            match evaluator.evaluate(selector, &env)? {
                Value::Null => {}
                v => values.push(v),
            }
        }
        Ok(values)
    }
}

/// Lazily shaped results of one execution.
///
/// Each `next` pulls rows from the cursor until one survives filtering.
/// Dropping the results drops the cursor.
pub struct QueryResults<'e> {
    cursor: Box<dyn RowCursor + 'e>,
    materializer: Materializer,
    finished: bool,
}

impl<'e> QueryResults<'e> {
    pub fn unit_of_work(&self) -> &UnitOfWork {
        self.materializer.unit_of_work()
    }

    pub fn terminal(&self) -> &Terminal {
        &self.materializer.compiled.translation.terminal
    }

    /// Drain every result.
    pub fn into_vec(mut self) -> RelqResult<(Vec<Shaped>, UnitOfWork)> {
        let mut items = Vec::new();
        for item in &mut self {
            items.push(item?);
        }
        Ok((items, self.materializer.into_unit_of_work()))
    }

    /// Pull as many results as the terminal operator needs and apply it.
    pub fn finish(mut self) -> RelqResult<(Shaped, UnitOfWork)> {
        let needed = self.materializer.needed();
        let mut items = Vec::new();
        while needed.is_none_or(|n| items.len() < n) {
            match self.next() {
                Some(item) => items.push(item?),
                None => break,
            }
        }
        let QueryResults { materializer, .. } = self;
        let value = materializer.reduce(items)?;
        Ok((value, materializer.into_unit_of_work()))
    }
}

impl Iterator for QueryResults<'_> {
    type Item = RelqResult<Shaped>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished || self.materializer.is_stopped() {
                self.finished = true;
                return None;
            }
            let row = match self.cursor.next_row() {
                Ok(Some(row)) => row,
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };
            match self.materializer.accept(&row) {
                Ok(Some(shaped)) => return Some(Ok(shaped)),
                Ok(None) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RecordingExecutor;
    use crate::metadata::{EntityDef, nullable_prop, prop};
    use crate::query::Query;
    use pretty_assertions::assert_eq;

    fn compiler() -> QueryCompiler {
        let model = Model::builder()
            .entity(
                EntityDef::new("Product")
                    .key(["Id"])
                    .property(prop("Id", ValueType::Int))
                    .property(nullable_prop("Name", ValueType::Text))
                    .property(prop("Price", ValueType::Float)),
            )
            .build()
            .unwrap();
        QueryCompiler::new(Arc::new(model), Dialect::Sqlite)
    }

    fn row(id: i64, name: &str, price: f64) -> ValueBuffer {
        ValueBuffer::new(vec![Value::Int(id), Value::from(name), Value::Float(price)])
    }

    #[test]
    fn test_literals_share_cache_entry() {
        let compiler = compiler();
        let query = |low: i64| {
            Query::from("Product")
                .filter(|p| p.member("Price").ge(low))
                .build()
                .unwrap()
        };
        let a = compiler.compile(&query(10)).unwrap();
        let b = compiler.compile(&query(20)).unwrap();
        assert!(!a.is_cache_hit());
        assert!(b.is_cache_hit());
        assert!(Arc::ptr_eq(a.compiled(), b.compiled()));
        assert_eq!(
            a.command().text,
            "SELECT \"p\".\"Id\", \"p\".\"Name\", \"p\".\"Price\" FROM \"Product\" AS \"p\" WHERE \"p\".\"Price\" >= ?"
        );
        assert_eq!(a.bind(&Params::new()).unwrap().for_command(a.command()).unwrap(), vec![Value::Int(10)]);
        assert_eq!(b.bind(&Params::new()).unwrap().for_command(b.command()).unwrap(), vec![Value::Int(20)]);
        assert_eq!(compiler.cache_stats().entries, 1);
    }

    #[test]
    fn test_missing_parameter_is_binding_error() {
        let compiler = compiler();
        let prepared = compiler.compile_text("Product.where(p => p.Price > $min)").unwrap();
        let err = prepared
            .bind(&Params::new())
            .and_then(|b| b.for_command(prepared.command()))
            .unwrap_err();
        assert!(matches!(err, RelqError::Binding(_)));
        assert!(!err.is_compile_error());
    }

    #[test]
    fn test_execute_streams_shaped_rows() {
        let compiler = compiler();
        let prepared = compiler
            .compile_text("Product.where(p => p.Price >= $min).order_by(p => p.Name)")
            .unwrap();
        let mut executor = RecordingExecutor::new(|_: &Command, _: &[Value]| {
            Ok(vec![row(1, "B", 10.0), row(3, "C", 12.0)])
        });
        let (items, uow) = prepared
            .execute(&mut executor, &Params::new().with("min", 10))
            .unwrap()
            .into_vec()
            .unwrap();
        let names: Vec<Value> = items
            .iter()
            .map(|s| uow.entry(s.as_entity().unwrap()).get("Name").unwrap().clone())
            .collect();
        assert_eq!(names, vec![Value::from("B"), Value::from("C")]);
        assert_eq!(executor.executed[0].parameters, vec![Value::Int(10)]);
    }

    #[test]
    fn test_column_count_mismatch_is_fatal() {
        let compiler = compiler();
        let prepared = compiler.compile_text("Product").unwrap();
        let mut executor = RecordingExecutor::new(|_: &Command, _: &[Value]| {
            Ok(vec![ValueBuffer::new(vec![Value::Int(1)])])
        });
        let mut results = prepared.execute(&mut executor, &Params::new()).unwrap();
        let err = results.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            RelqError::ShapeMismatch {
                expected: 3,
                actual: 1
            }
        ));
        assert!(results.next().is_none());
    }

    #[test]
    fn test_post_filter_then_take_in_memory() {
        let mut host = HostFunctions::new();
        host.register("is_even", |args: &[Value]| {
            Ok(Value::Bool(args[0].as_i64().is_some_and(|n| n % 2 == 0)))
        });
        let compiler = compiler()
            .with_host_functions(host)
            .with_options(CompileOptions {
                client_evaluation: ClientEvaluation::Allow,
                ..Default::default()
            });
        let prepared = compiler
            .compile_text("Product.where(p => is_even(p.Id)).take(1)")
            .unwrap();
        // no LIMIT on the server: the filter runs after materialization
        assert!(!prepared.command().text.contains("LIMIT"));

        let mut executor = RecordingExecutor::new(|_: &Command, _: &[Value]| {
            Ok(vec![row(1, "A", 1.0), row(2, "B", 2.0), row(4, "C", 3.0)])
        });
        let (items, uow) = prepared
            .execute(&mut executor, &Params::new())
            .unwrap()
            .into_vec()
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(uow.entry(items[0].as_entity().unwrap()).get("Id"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_first_on_empty_result() {
        let compiler = compiler();
        let mut executor = RecordingExecutor::new(|_: &Command, _: &[Value]| Ok(vec![]));
        let first = compiler.compile_text("Product.first()").unwrap();
        assert!(matches!(
            first.execute_scalar(&mut executor, &Params::new()),
            Err(RelqError::EmptySequence)
        ));
        let or_default = compiler.compile_text("Product.first_or_default()").unwrap();
        let (value, _) = or_default
            .execute_scalar(&mut executor, &Params::new())
            .unwrap();
        assert_eq!(value, Shaped::Null);
    }

    #[test]
    fn test_count_reads_single_value() {
        let compiler = compiler();
        let prepared = compiler.compile_text("Product.count()").unwrap();
        let mut executor = RecordingExecutor::new(|_: &Command, _: &[Value]| {
            Ok(vec![ValueBuffer::new(vec![Value::Int(3)])])
        });
        let (value, _) = prepared.execute_scalar(&mut executor, &Params::new()).unwrap();
        assert_eq!(value, Shaped::Value(Value::Int(3)));
    }
}
