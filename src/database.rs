//! Embedded database facade.
//!
//! Wires the layers together for the layer that opens and closes the
//! engine: one page file behind a shared buffer pool, a catalog sidecar,
//! a heap [`Table`] per declared table and a [`BTree`] per index. Rows
//! are encoded with the table's row descriptor; secondary index keys
//! append the record id to the indexed columns, so non-unique columns
//! need no duplicate handling in the tree itself; the composite-key
//! comparison does the work.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::catalog::{Catalog, CatalogError, ColumnInfo, IndexInfo, TableInfo};
use crate::index::{BTree, IndexError, DEFAULT_ORDER};
use crate::schema::{codec, DecodeError, Field, IntWidth, SchemaError, TypeDescriptor, Value};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::disk::PageManager;
use crate::storage::page::RecordId;
use crate::storage::StorageError;
use crate::table::Table;

pub const DEFAULT_POOL_CAPACITY: usize = 256;

const PAGE_FILE: &str = "pages.db";
const CATALOG_FILE: &str = "catalog.bin";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("expected {expected} column values, got {got}")]
    ColumnCountMismatch { expected: usize, got: usize },

    #[error("primary key must name at least one column")]
    EmptyPrimaryKey,
}

pub type DbResult<T> = Result<T, DatabaseError>;

pub struct Database {
    buffer_pool: BufferPoolManager,
    catalog: Catalog,
    tables: HashMap<String, Table>,
    trees: HashMap<(String, String), BTree>,
}

impl Database {
    /// Create a fresh database directory.
    pub fn create(dir: &Path) -> DbResult<Self> {
        Self::create_with_capacity(dir, DEFAULT_POOL_CAPACITY)
    }

    pub fn create_with_capacity(dir: &Path, pool_capacity: usize) -> DbResult<Self> {
        fs::create_dir_all(dir).map_err(StorageError::Io)?;
        let page_manager = PageManager::create(&dir.join(PAGE_FILE))?;
        let buffer_pool = BufferPoolManager::with_lru(page_manager, pool_capacity);
        let catalog = Catalog::create(&dir.join(CATALOG_FILE))?;
        Ok(Self {
            buffer_pool,
            catalog,
            tables: HashMap::new(),
            trees: HashMap::new(),
        })
    }

    /// Open an existing database directory, reattaching every table and
    /// index recorded in the catalog.
    pub fn open(dir: &Path) -> DbResult<Self> {
        Self::open_with_capacity(dir, DEFAULT_POOL_CAPACITY)
    }

    pub fn open_with_capacity(dir: &Path, pool_capacity: usize) -> DbResult<Self> {
        let page_manager = PageManager::open(&dir.join(PAGE_FILE))?;
        let buffer_pool = BufferPoolManager::with_lru(page_manager, pool_capacity);
        let catalog = Catalog::open(&dir.join(CATALOG_FILE))?;

        let mut tables = HashMap::new();
        let mut trees = HashMap::new();
        for info in catalog.tables() {
            let table = Table::open(buffer_pool.clone(), info.first_heap_page, info.table_id)?;
            tables.insert(info.name.clone(), table);
            for index in &info.indexes {
                let key_type = index_key_type(info, index)?;
                let tree = BTree::open(
                    buffer_pool.clone(),
                    key_type,
                    index.order,
                    index.root_page_id,
                    index.index_id,
                )?;
                trees.insert((info.name.clone(), index.name.clone()), tree);
            }
        }
        Ok(Self {
            buffer_pool,
            catalog,
            tables,
            trees,
        })
    }

    /// Declare a table. A unique primary-key index is created with it.
    pub fn create_table(
        &mut self,
        name: &str,
        columns: Vec<(String, TypeDescriptor)>,
        primary_key: Vec<String>,
    ) -> DbResult<()> {
        if primary_key.is_empty() {
            return Err(DatabaseError::EmptyPrimaryKey);
        }
        if self.catalog.table(name).is_ok() {
            return Err(CatalogError::DuplicateTable(name.to_owned()).into());
        }
        let columns: Vec<ColumnInfo> = columns
            .into_iter()
            .map(|(name, ty)| ColumnInfo { name, ty })
            .collect();

        let mut info = TableInfo {
            name: name.to_owned(),
            table_id: 0,
            columns,
            primary_key: primary_key.clone(),
            first_heap_page: crate::storage::page::PageId::INVALID,
            indexes: Vec::new(),
        };
        // Catches duplicate or malformed column types up front.
        info.row_type().validate()?;
        for column in &primary_key {
            if info.column_position(column).is_none() {
                return Err(CatalogError::UnknownColumn {
                    table: name.to_owned(),
                    column: column.clone(),
                }
                .into());
            }
        }

        info.table_id = self.catalog.next_id();
        let table = Table::create(self.buffer_pool.clone(), info.table_id)?;
        info.first_heap_page = table.first_page();

        let pk_index = IndexInfo {
            name: format!("{name}_pk"),
            index_id: self.catalog.next_id(),
            columns: primary_key,
            unique: true,
            order: DEFAULT_ORDER,
            root_page_id: crate::storage::page::PageId::INVALID,
        };
        let key_type = index_key_type(&info, &pk_index)?;
        let tree = BTree::create(
            self.buffer_pool.clone(),
            key_type,
            pk_index.order,
            pk_index.index_id,
        )?;
        let mut pk_index = pk_index;
        pk_index.root_page_id = tree.root_page_id();

        self.trees
            .insert((name.to_owned(), pk_index.name.clone()), tree);
        info.indexes.push(pk_index);
        self.tables.insert(name.to_owned(), table);
        self.catalog.add_table(info)?;
        self.catalog.save()?;
        Ok(())
    }

    /// Declare a secondary index and build it from existing rows.
    pub fn create_index(
        &mut self,
        table: &str,
        index_name: &str,
        columns: Vec<String>,
        unique: bool,
        order: usize,
    ) -> DbResult<()> {
        let info = self.catalog.table(table)?.clone();
        if info.index(index_name).is_some() {
            return Err(CatalogError::DuplicateIndex(index_name.to_owned()).into());
        }
        for column in &columns {
            if info.column_position(column).is_none() {
                return Err(CatalogError::UnknownColumn {
                    table: table.to_owned(),
                    column: column.clone(),
                }
                .into());
            }
        }

        let index = IndexInfo {
            name: index_name.to_owned(),
            index_id: self.catalog.next_id(),
            columns,
            unique,
            order,
            root_page_id: crate::storage::page::PageId::INVALID,
        };
        let key_type = index_key_type(&info, &index)?;
        let mut tree = BTree::create(
            self.buffer_pool.clone(),
            key_type,
            index.order,
            index.index_id,
        )?;

        // Backfill from the heap.
        let row_type = info.row_type();
        let rows: Vec<(RecordId, Vec<u8>)> = self
            .tables
            .get(table)
            .ok_or_else(|| CatalogError::UnknownTable(table.to_owned()))?
            .scan()
            .collect::<Result<_, _>>()?;
        for (rid, bytes) in rows {
            let row = decode_row(&row_type, &bytes)?;
            let key = index_key_values(&info, &index, &row, rid)?;
            if index.unique && tree.lookup(&key)?.is_some() {
                return Err(IndexError::DuplicateKey.into());
            }
            tree.insert(&key, rid)?;
        }

        let mut index = index;
        index.root_page_id = tree.root_page_id();
        self.trees
            .insert((table.to_owned(), index.name.clone()), tree);
        self.catalog.table_mut(table)?.indexes.push(index);
        self.catalog.save()?;
        Ok(())
    }

    /// Insert a row and maintain every index on the table.
    pub fn insert(&mut self, table: &str, values: Vec<Value>) -> DbResult<RecordId> {
        let info = self.catalog.table(table)?.clone();
        if values.len() != info.columns.len() {
            return Err(DatabaseError::ColumnCountMismatch {
                expected: info.columns.len(),
                got: values.len(),
            });
        }

        let row_value = Value::Struct(values);
        let row_bytes = codec::encode(&info.row_type(), &row_value)?;
        let row = match &row_value {
            Value::Struct(values) => values.as_slice(),
            _ => unreachable!(),
        };

        // Unique constraints are checked before anything is written.
        for index in info.indexes.iter().filter(|i| i.unique) {
            let key = unique_key_values(&info, index, row)?;
            let tree = self
                .trees
                .get(&(table.to_owned(), index.name.clone()))
                .ok_or_else(|| CatalogError::UnknownIndex(index.name.clone()))?;
            if tree.lookup(&key)?.is_some() {
                return Err(IndexError::DuplicateKey.into());
            }
        }

        let rid = self
            .tables
            .get_mut(table)
            .ok_or_else(|| CatalogError::UnknownTable(table.to_owned()))?
            .insert(&row_bytes)?;

        for index in &info.indexes {
            let key = index_key_values(&info, index, row, rid)?;
            let tree = self
                .trees
                .get_mut(&(table.to_owned(), index.name.clone()))
                .ok_or_else(|| CatalogError::UnknownIndex(index.name.clone()))?;
            tree.insert(&key, rid)?;
        }

        self.sync_index_roots(table)?;
        Ok(rid)
    }

    /// Point lookup through the primary-key index.
    pub fn lookup(
        &self,
        table: &str,
        pk_values: &[Value],
    ) -> DbResult<Option<(RecordId, Vec<Value>)>> {
        let info = self.catalog.table(table)?;
        let pk_name = format!("{table}_pk");
        let tree = self
            .trees
            .get(&(table.to_owned(), pk_name))
            .ok_or_else(|| CatalogError::UnknownIndex(format!("{table}_pk")))?;

        let key = Value::Struct(pk_values.to_vec());
        let Some(rid) = tree.lookup(&key)? else {
            return Ok(None);
        };
        let Some(bytes) = self
            .tables
            .get(table)
            .ok_or_else(|| CatalogError::UnknownTable(table.to_owned()))?
            .get(rid)?
        else {
            return Ok(None);
        };
        Ok(Some((rid, decode_row(&info.row_type(), &bytes)?)))
    }

    /// Delete a row by primary key, maintaining every index.
    pub fn delete(&mut self, table: &str, pk_values: &[Value]) -> DbResult<bool> {
        let info = self.catalog.table(table)?.clone();
        let Some((rid, row)) = self.lookup(table, pk_values)? else {
            return Ok(false);
        };

        for index in &info.indexes {
            let key = index_key_values(&info, index, &row, rid)?;
            let tree = self
                .trees
                .get_mut(&(table.to_owned(), index.name.clone()))
                .ok_or_else(|| CatalogError::UnknownIndex(index.name.clone()))?;
            tree.delete(&key)?;
        }

        self.tables
            .get_mut(table)
            .ok_or_else(|| CatalogError::UnknownTable(table.to_owned()))?
            .delete(rid)?;
        self.sync_index_roots(table)?;
        Ok(true)
    }

    /// Ordered scan over an index. Bounds give values for a prefix of
    /// the indexed columns; rows come back in index-key order.
    pub fn index_scan(
        &self,
        table: &str,
        index_name: &str,
        low: Option<(&[Value], bool)>,
        high: Option<(&[Value], bool)>,
    ) -> DbResult<Vec<(RecordId, Vec<Value>)>> {
        let info = self.catalog.table(table)?;
        let tree = self
            .trees
            .get(&(table.to_owned(), index_name.to_owned()))
            .ok_or_else(|| CatalogError::UnknownIndex(index_name.to_owned()))?;
        let heap = self
            .tables
            .get(table)
            .ok_or_else(|| CatalogError::UnknownTable(table.to_owned()))?;

        let low = match low {
            None => None,
            Some((values, inclusive)) => Some(tree.prefix_bound(values, inclusive)?),
        };
        let high = match high {
            None => None,
            Some((values, inclusive)) => Some(tree.prefix_bound(values, inclusive)?),
        };

        let row_type = info.row_type();
        let mut rows = Vec::new();
        for entry in tree.range_scan(low, high)? {
            let (_, rid) = entry?;
            if let Some(bytes) = heap.get(rid)? {
                rows.push((rid, decode_row(&row_type, &bytes)?));
            }
        }
        Ok(rows)
    }

    /// Unordered scan of every row in a table.
    pub fn scan_table(&self, table: &str) -> DbResult<Vec<(RecordId, Vec<Value>)>> {
        let info = self.catalog.table(table)?;
        let heap = self
            .tables
            .get(table)
            .ok_or_else(|| CatalogError::UnknownTable(table.to_owned()))?;
        let row_type = info.row_type();
        let mut rows = Vec::new();
        for entry in heap.scan() {
            let (rid, bytes) = entry?;
            rows.push((rid, decode_row(&row_type, &bytes)?));
        }
        Ok(rows)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn index_stats(&self, table: &str, index_name: &str) -> DbResult<crate::index::IndexStats> {
        let tree = self
            .trees
            .get(&(table.to_owned(), index_name.to_owned()))
            .ok_or_else(|| CatalogError::UnknownIndex(index_name.to_owned()))?;
        Ok(tree.stats()?)
    }

    /// Write all dirty pages and the catalog through to disk.
    pub fn flush(&mut self) -> DbResult<()> {
        self.buffer_pool.flush_all()?;
        self.catalog.save()?;
        Ok(())
    }

    /// Record moved index roots (after splits or shrinks) in the
    /// catalog so reopening finds the trees.
    fn sync_index_roots(&mut self, table: &str) -> DbResult<()> {
        let info = self.catalog.table_mut(table)?;
        let mut changed = false;
        for index in &mut info.indexes {
            if let Some(tree) = self.trees.get(&(table.to_owned(), index.name.clone())) {
                if index.root_page_id != tree.root_page_id() {
                    index.root_page_id = tree.root_page_id();
                    changed = true;
                }
            }
        }
        if changed {
            self.catalog.save()?;
        }
        Ok(())
    }
}

/// Key descriptor for one index: the indexed columns, plus the record
/// id fields for non-unique indexes so every stored key is distinct.
fn index_key_type(table: &TableInfo, index: &IndexInfo) -> DbResult<TypeDescriptor> {
    let mut fields = Vec::with_capacity(index.columns.len() + 2);
    for column in &index.columns {
        let position = table.column_position(column).ok_or_else(|| {
            CatalogError::UnknownColumn {
                table: table.name.clone(),
                column: column.clone(),
            }
        })?;
        fields.push(Field::new(
            column.clone(),
            table.columns[position].ty.clone(),
        ));
    }
    if !index.unique {
        fields.push(Field::new("__rid_page", TypeDescriptor::uint(IntWidth::W32)));
        fields.push(Field::new("__rid_slot", TypeDescriptor::uint(IntWidth::W16)));
    }
    Ok(TypeDescriptor::Struct { fields })
}

fn index_key_values(
    table: &TableInfo,
    index: &IndexInfo,
    row: &[Value],
    rid: RecordId,
) -> DbResult<Value> {
    let mut values = column_values(table, index, row)?;
    if !index.unique {
        values.push(Value::Uint(rid.page_id.0 as u64));
        values.push(Value::Uint(rid.slot as u64));
    }
    Ok(Value::Struct(values))
}

fn unique_key_values(table: &TableInfo, index: &IndexInfo, row: &[Value]) -> DbResult<Value> {
    Ok(Value::Struct(column_values(table, index, row)?))
}

fn column_values(table: &TableInfo, index: &IndexInfo, row: &[Value]) -> DbResult<Vec<Value>> {
    index
        .columns
        .iter()
        .map(|column| {
            let position = table.column_position(column).ok_or_else(|| {
                DatabaseError::from(CatalogError::UnknownColumn {
                    table: table.name.clone(),
                    column: column.clone(),
                })
            })?;
            Ok(row[position].clone())
        })
        .collect()
}

fn decode_row(row_type: &TypeDescriptor, bytes: &[u8]) -> DbResult<Vec<Value>> {
    match codec::decode(row_type, bytes)? {
        Value::Struct(values) => Ok(values),
        _ => unreachable!("row descriptor is always a struct"),
    }
}
