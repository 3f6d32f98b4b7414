//! Fixtures for building analyzed statements in tests.

use std::sync::Arc;

use crate::analysis::AnalysisResult;
use crate::analysis::descriptor::DescriptorTable;
use crate::analysis::registry::PredicateRegistry;
use crate::analysis::statement::{
    BaseTableRef, InlineViewRef, InsertTarget, JoinClause, JoinHint, JoinOp, Qualifier,
    QueryStatement, SelectStatement, TableRef, UnionOperand, UnionStatement,
};
use crate::analysis::table::{TableDescriptor, TableFormat};
use crate::datatype::DataType;
use crate::expr::{self, ColumnExpr, Expression, lit};
use crate::expr::literal_expr::ScalarValue;
use crate::ids::{SlotId, TupleId};
use crate::storage::HostPort;
use crate::storage::memory::{FileBlock, MemoryStorage, Region};

const ALLTYPES_COLUMNS: [(&str, DataType); 9] = [
    ("year", DataType::Int32),
    ("month", DataType::Int32),
    ("id", DataType::Int32),
    ("bool_col", DataType::Boolean),
    ("int_col", DataType::Int32),
    ("bigint_col", DataType::Int64),
    ("double_col", DataType::Float64),
    ("string_col", DataType::Utf8),
    ("timestamp_col", DataType::Timestamp),
];

/// File table partitioned by year and month, four 100 byte files.
pub fn alltypes() -> TableDescriptor {
    TableDescriptor::new("alltypes", TableFormat::File, ALLTYPES_COLUMNS, 2)
}

/// Same layout as alltypes with a single 10 byte file per host.
pub fn alltypes_small() -> TableDescriptor {
    TableDescriptor::new("alltypes_small", TableFormat::File, ALLTYPES_COLUMNS, 2)
}

/// Key-value table with a string row key.
pub fn kvtable() -> TableDescriptor {
    TableDescriptor::new(
        "kvtable",
        TableFormat::KeyValue,
        [
            ("id", DataType::Utf8),
            ("int_col", DataType::Int32),
            ("string_col", DataType::Utf8),
        ],
        1,
    )
}

/// Key-value table whose row key isn't a string.
pub fn kv_int_key() -> TableDescriptor {
    TableDescriptor::new(
        "kv_int_key",
        TableFormat::KeyValue,
        [
            ("id", DataType::Int32),
            ("int_col", DataType::Int32),
            ("string_col", DataType::Utf8),
        ],
        1,
    )
}

pub fn hosts(n: usize) -> Vec<HostPort> {
    (1..=n)
        .map(|i| HostPort::new(format!("host{i}"), 9000))
        .collect()
}

/// Storage holding every fixture table, data spread round robin over
/// `hosts`. Every table is empty if there are no hosts.
pub fn test_storage(hosts: &[HostPort]) -> MemoryStorage {
    let mut storage = MemoryStorage::new();
    if hosts.is_empty() {
        for table in [alltypes(), alltypes_small(), kvtable(), kv_int_key()] {
            storage.add_empty_table(&table);
        }
        return storage;
    }

    let partitions = [(2009, 1), (2009, 2), (2010, 1), (2010, 2)];
    for (idx, (year, month)) in partitions.into_iter().enumerate() {
        storage
            .add_file_block(
                "alltypes",
                file_block("alltypes", year, month, 100, &hosts[idx % hosts.len()]),
            )
            .unwrap();
    }

    for (idx, host) in hosts.iter().enumerate() {
        storage
            .add_file_block(
                "alltypes_small",
                file_block("alltypes_small", 2009, idx as i64 + 1, 10, host),
            )
            .unwrap();
    }

    let regions = [(None, Some("b")), (Some("b"), Some("d")), (Some("d"), None)];
    for table in ["kvtable", "kv_int_key"] {
        for (idx, (start, stop)) in regions.into_iter().enumerate() {
            storage
                .add_region(
                    table,
                    Region {
                        start_key: start.map(str::to_string),
                        stop_key: stop.map(str::to_string),
                        host: hosts[idx % hosts.len()].clone(),
                    },
                )
                .unwrap();
        }
    }

    storage
}

fn file_block(table: &str, year: i64, month: i64, length: u64, host: &HostPort) -> FileBlock {
    FileBlock {
        path: format!("/{table}/year={year}/month={month}/data"),
        offset: 0,
        length,
        file_length: length,
        host: host.clone(),
        partition_values: vec![ScalarValue::Int64(year), ScalarValue::Int64(month)],
    }
}

pub fn select(table_refs: Vec<TableRef>, result_exprs: Vec<Expression>) -> SelectStatement {
    SelectStatement {
        table_refs,
        result_exprs,
        ..Default::default()
    }
}

/// Stands in for semantic analysis of the top-level query block.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    pub desc_tbl: DescriptorTable,
    pub registry: PredicateRegistry,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference to a table, with a slot for every column.
    pub fn add_table(&mut self, table: &TableDescriptor) -> TableScope {
        let table = Arc::new(table.clone());
        let tuple_id = self.desc_tbl.create_tuple(Some(table.clone()));

        let columns = table
            .columns
            .iter()
            .enumerate()
            .map(|(pos, col)| {
                let label = format!("{}.{}", table.name, col.name);
                let slot = self
                    .desc_tbl
                    .add_slot(tuple_id, label.clone(), col.datatype, Some(pos))
                    .unwrap();
                (col.name.clone(), ColumnExpr::new(tuple_id, slot, col.datatype, label))
            })
            .collect();

        TableScope {
            tuple_id,
            base: BaseTableRef {
                tuple_id,
                table,
                join: None,
            },
            columns,
        }
    }

    /// Add an inline view selecting every column of `table`.
    ///
    /// `body` may register conjuncts in the view's own registry.
    pub fn add_view(
        &mut self,
        alias: &str,
        table: &TableDescriptor,
        body: impl FnOnce(&mut PredicateRegistry, &TableScope),
    ) -> ViewScope {
        let inner = self.add_table(table);
        let mut registry = PredicateRegistry::new();
        body(&mut registry, &inner);

        let result_exprs = inner.columns.iter().map(|(_, c)| expr::column(c)).collect();
        let mut view = self.add_view_over(
            alias,
            QueryStatement::Select(select(vec![inner.table_ref()], result_exprs)),
            vec![inner.tuple_id],
        );
        view.registry = registry;

        ViewScope { inner, view }
    }

    /// Add an inline view with an arbitrary body whose output outer
    /// expressions reference through `materialized_tuple_ids`.
    pub fn add_view_over(
        &mut self,
        alias: &str,
        body: QueryStatement,
        materialized_tuple_ids: Vec<TupleId>,
    ) -> InlineViewRef {
        InlineViewRef {
            alias: alias.to_string(),
            tuple_id: self.desc_tbl.create_tuple(None),
            body: Box::new(body),
            registry: PredicateRegistry::new(),
            materialized_tuple_ids,
            join: None,
        }
    }

    /// Register a WHERE conjunct of the top-level block.
    pub fn filter(&mut self, expr: Expression) {
        self.registry.register_conjunct(expr);
    }

    /// Register the ON clause of the outer join with `rhs`.
    pub fn on_clause(&mut self, rhs: &TableScope, expr: Expression) {
        self.registry.register_on_clause(rhs.tuple_id, expr);
    }

    /// Register the ON clause of an inner join.
    pub fn inner_on_clause(&mut self, expr: Expression) {
        self.registry.register_inner_join_on(expr);
    }

    pub fn finish_select(self, select: SelectStatement) -> AnalysisResult {
        self.finish(QueryStatement::Select(select), None)
    }

    pub fn finish_union(self, union: UnionStatement) -> AnalysisResult {
        self.finish(QueryStatement::Union(union), None)
    }

    pub fn finish_insert(self, select: SelectStatement, table: &str) -> AnalysisResult {
        let target = InsertTarget {
            table: table.to_string(),
            overwrite: false,
        };
        self.finish(QueryStatement::Select(select), Some(target))
    }

    fn finish(self, statement: QueryStatement, insert: Option<InsertTarget>) -> AnalysisResult {
        AnalysisResult {
            statement,
            registry: self.registry,
            desc_tbl: self.desc_tbl,
            insert,
        }
    }
}

/// A base table reference added by [`QueryBuilder::add_table`].
#[derive(Debug, Clone)]
pub struct TableScope {
    pub tuple_id: TupleId,
    base: BaseTableRef,
    columns: Vec<(String, ColumnExpr)>,
}

impl TableScope {
    fn column(&self, name: &str) -> &ColumnExpr {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, c)| c)
            .unwrap_or_else(|| panic!("missing column {name}"))
    }

    pub fn col(&self, name: &str) -> Expression {
        expr::column(self.column(name))
    }

    pub fn slot(&self, name: &str) -> SlotId {
        self.column(name).slot_id
    }

    pub fn base_ref(&self) -> &BaseTableRef {
        &self.base
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::Base(self.base.clone())
    }

    pub fn joined(&self, op: JoinOp, hint: Option<JoinHint>) -> TableRef {
        TableRef::Base(BaseTableRef {
            join: Some(JoinClause { op, hint }),
            ..self.base.clone()
        })
    }
}

/// An inline view added by [`QueryBuilder::add_view`].
#[derive(Debug, Clone)]
pub struct ViewScope {
    pub inner: TableScope,
    pub view: InlineViewRef,
}

impl ViewScope {
    /// Column of the view, already substituted with the body's column.
    pub fn col(&self, name: &str) -> Expression {
        self.inner.col(name)
    }

    pub fn view_ref(&self) -> &InlineViewRef {
        &self.view
    }

    /// Put a LIMIT on the view body.
    pub fn with_limit(mut self, limit: u64) -> Self {
        if let QueryStatement::Select(body) = self.view.body.as_mut() {
            body.limit = Some(limit);
        }
        self
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::InlineView(self.view.clone())
    }

    pub fn joined(&self, op: JoinOp, hint: Option<JoinHint>) -> TableRef {
        TableRef::InlineView(InlineViewRef {
            join: Some(JoinClause { op, hint }),
            ..self.view.clone()
        })
    }
}

/// Builds a UNION over operands producing `num_cols` integer columns.
#[derive(Debug)]
pub struct UnionBuilder {
    num_cols: usize,
    tuple_id: TupleId,
    result_exprs: Vec<Expression>,
    operands: Vec<UnionOperand>,
}

impl UnionBuilder {
    pub fn new(builder: &mut QueryBuilder, num_cols: usize) -> Self {
        let tuple_id = builder.desc_tbl.create_tuple(None);
        let result_exprs = (0..num_cols)
            .map(|idx| {
                let label = format!("union.c{idx}");
                let slot = builder
                    .desc_tbl
                    .add_slot(tuple_id, label.clone(), DataType::Int32, None)
                    .unwrap();
                expr::column(&ColumnExpr::new(tuple_id, slot, DataType::Int32, label))
            })
            .collect();

        UnionBuilder {
            num_cols,
            tuple_id,
            result_exprs,
            operands: Vec::new(),
        }
    }

    /// Add a SELECT of the first integer columns after the clustering
    /// columns of `table`.
    pub fn select_operand(&mut self, builder: &mut QueryBuilder, table: &TableDescriptor, qualifier: Qualifier) {
        let scope = builder.add_table(table);
        let result_exprs = table
            .columns
            .iter()
            .skip(table.num_clustering_cols)
            .filter(|col| col.datatype == DataType::Int32)
            .take(self.num_cols)
            .map(|col| scope.col(&col.name))
            .collect();

        self.push(
            UnionOperand {
                statement: QueryStatement::Select(select(vec![scope.table_ref()], result_exprs)),
                registry: PredicateRegistry::new(),
                qualifier,
            },
            qualifier,
        );
    }

    /// Add a SELECT without FROM clause.
    pub fn constant_operand(&mut self, qualifier: Qualifier) {
        let result_exprs = (0..self.num_cols).map(|idx| lit(idx as i64)).collect();
        self.push(
            UnionOperand {
                statement: QueryStatement::Select(select(Vec::new(), result_exprs)),
                registry: PredicateRegistry::new(),
                qualifier,
            },
            qualifier,
        );
    }

    /// Build a nested union with the same number of columns. The returned
    /// operand still needs to be pushed.
    pub fn nested(
        &self,
        builder: &mut QueryBuilder,
        build: impl FnOnce(&mut QueryBuilder, &mut UnionBuilder),
    ) -> UnionOperand {
        let mut nested = UnionBuilder::new(builder, self.num_cols);
        build(builder, &mut nested);
        UnionOperand {
            statement: QueryStatement::Union(nested.finish()),
            registry: PredicateRegistry::new(),
            qualifier: Qualifier::All,
        }
    }

    pub fn push(&mut self, mut operand: UnionOperand, qualifier: Qualifier) {
        operand.qualifier = qualifier;
        self.operands.push(operand);
    }

    pub fn finish(self) -> UnionStatement {
        UnionStatement {
            operands: self.operands,
            tuple_id: self.tuple_id,
            result_exprs: self.result_exprs,
            sort_info: None,
            limit: None,
        }
    }
}
