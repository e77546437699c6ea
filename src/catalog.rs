//! Table and index metadata.
//!
//! The catalog maps table names to their declared columns, primary key
//! and secondary indexes, and remembers each index's root page so trees
//! can be reopened. It persists as a bincode sidecar file next to the
//! page file; page-format data never goes through bincode.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::TypeDescriptor;
use crate::storage::page::PageId;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("I/O fault: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog encoding fault: {0}")]
    Codec(#[from] bincode::Error),

    #[error("table {0:?} already exists")]
    DuplicateTable(String),

    #[error("unknown table {0:?}")]
    UnknownTable(String),

    #[error("unknown column {column:?} in table {table:?}")]
    UnknownColumn { table: String, column: String },

    #[error("index {0:?} already exists")]
    DuplicateIndex(String),

    #[error("unknown index {0:?}")]
    UnknownIndex(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub ty: TypeDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub index_id: u32,
    /// Indexed column names, in key order.
    pub columns: Vec<String>,
    pub unique: bool,
    pub order: usize,
    pub root_page_id: PageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub table_id: u32,
    pub columns: Vec<ColumnInfo>,
    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,
    pub first_heap_page: PageId,
    pub indexes: Vec<IndexInfo>,
}

impl TableInfo {
    /// The row descriptor: a struct of the columns in declared order.
    pub fn row_type(&self) -> TypeDescriptor {
        TypeDescriptor::Struct {
            fields: self
                .columns
                .iter()
                .map(|c| crate::schema::Field::new(c.name.clone(), c.ty.clone()))
                .collect(),
        }
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexInfo> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn index_mut(&mut self, name: &str) -> Option<&mut IndexInfo> {
        self.indexes.iter_mut().find(|i| i.name == name)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogData {
    tables: BTreeMap<String, TableInfo>,
    next_id: u32,
}

/// The persistent catalog.
#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    data: CatalogData,
}

impl Catalog {
    pub fn create(path: &Path) -> CatalogResult<Self> {
        let catalog = Self {
            path: path.to_owned(),
            data: CatalogData {
                tables: BTreeMap::new(),
                next_id: 1,
            },
        };
        catalog.save()?;
        Ok(catalog)
    }

    pub fn open(path: &Path) -> CatalogResult<Self> {
        let bytes = fs::read(path)?;
        let data = bincode::deserialize(&bytes)?;
        Ok(Self {
            path: path.to_owned(),
            data,
        })
    }

    pub fn save(&self) -> CatalogResult<()> {
        let bytes = bincode::serialize(&self.data)?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.data.next_id;
        self.data.next_id += 1;
        id
    }

    pub fn add_table(&mut self, info: TableInfo) -> CatalogResult<()> {
        if self.data.tables.contains_key(&info.name) {
            return Err(CatalogError::DuplicateTable(info.name));
        }
        self.data.tables.insert(info.name.clone(), info);
        Ok(())
    }

    pub fn table(&self, name: &str) -> CatalogResult<&TableInfo> {
        self.data
            .tables
            .get(name)
            .ok_or_else(|| CatalogError::UnknownTable(name.to_owned()))
    }

    pub fn table_mut(&mut self, name: &str) -> CatalogResult<&mut TableInfo> {
        self.data
            .tables
            .get_mut(name)
            .ok_or_else(|| CatalogError::UnknownTable(name.to_owned()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.data.tables.values()
    }
}
