//! In-memory storage collaborator
//!
//! Tables are sequences of fixed-capacity tile groups. Every tuple slot
//! carries an MVCC header (owner, commit-id range, version chain links) that
//! the transaction manager reads and writes; nothing in this module
//! interprets those fields beyond initializing them.

mod data_table;
mod index;
mod manager;
mod tile_group;

pub use data_table::DataTable;
pub use index::{Index, IndexKind};
pub use manager::{StorageManager, TileGroupCatalog};
pub use tile_group::{TileGroup, TileGroupHeader};

use crate::error::{Error, Result};
use crate::types::{TypeId, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Transaction id
pub type TxnId = u64;
/// Commit id
pub type Cid = u64;
/// Object id (tables, tile groups, tuple offsets)
pub type Oid = u32;

/// Owner of an unused or invisible slot
pub const INVALID_TXN_ID: TxnId = 0;
/// Owner of a committed, unlocked version
pub const INITIAL_TXN_ID: TxnId = 1;
/// End commit id of a version deleted by its owner
pub const INVALID_CID: Cid = 0;
/// Open-ended commit id
pub const MAX_CID: Cid = Cid::MAX;
/// Missing object id
pub const INVALID_OID: Oid = Oid::MAX;

/// Physical address of a tuple version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemPointer {
    /// Tile group id
    pub block: Oid,
    /// Slot within the tile group
    pub offset: Oid,
}

impl ItemPointer {
    /// The null pointer
    pub const INVALID: ItemPointer = ItemPointer {
        block: INVALID_OID,
        offset: INVALID_OID,
    };

    /// Pointer to `offset` in tile group `block`
    pub fn new(block: Oid, offset: Oid) -> Self {
        Self { block, offset }
    }

    /// Whether this is the null pointer
    pub fn is_null(&self) -> bool {
        self.block == INVALID_OID
    }

    /// Pack into one word for atomic storage
    pub fn pack(self) -> u64 {
        ((self.block as u64) << 32) | self.offset as u64
    }

    /// Inverse of [`ItemPointer::pack`]
    pub fn unpack(word: u64) -> Self {
        Self {
            block: (word >> 32) as Oid,
            offset: word as Oid,
        }
    }
}

impl Default for ItemPointer {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for ItemPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("(null)")
        } else {
            write!(f, "({}, {})", self.block, self.offset)
        }
    }
}

/// Shared head pointer of a version chain; indexes point here
pub type Indirection = Arc<AtomicU64>;

/// New indirection pointing at `location`
pub fn new_indirection(location: ItemPointer) -> Indirection {
    Arc::new(AtomicU64::new(location.pack()))
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Column type
    pub type_id: TypeId,
    /// Whether nulls are accepted
    pub nullable: bool,
}

impl Column {
    /// Nullable column
    pub fn new(name: impl Into<String>, type_id: TypeId) -> Self {
        Self {
            name: name.into(),
            type_id,
            nullable: true,
        }
    }

    /// Column rejecting nulls
    pub fn not_null(name: impl Into<String>, type_id: TypeId) -> Self {
        Self {
            nullable: false,
            ..Self::new(name, type_id)
        }
    }
}

/// Ordered column list of a table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Schema over `columns`
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Columns in order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column by position
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Position of a named column
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Cast a row to the column types, enforcing NOT NULL
    pub fn conform(&self, values: Vec<Value>) -> Result<Vec<Value>> {
        if values.len() != self.columns.len() {
            return Err(Error::invalid_input(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }
        values
            .into_iter()
            .zip(&self.columns)
            .map(|(value, column)| {
                if value.is_null() && !column.nullable {
                    return Err(Error::invalid_input(format!(
                        "column '{}' does not accept nulls",
                        column.name
                    )));
                }
                value.cast_as(column.type_id)
            })
            .collect()
    }

    /// Typed nulls for every column
    pub fn null_row(&self) -> Vec<Value> {
        self.columns.iter().map(|c| Value::null(c.type_id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_pointer_packing() {
        let p = ItemPointer::new(7, 42);
        assert_eq!(ItemPointer::unpack(p.pack()), p);
        assert!(ItemPointer::unpack(ItemPointer::INVALID.pack()).is_null());
        assert!(!p.is_null());
    }

    #[test]
    fn test_conform_casts_and_checks_nulls() {
        let schema = Schema::new(vec![
            Column::not_null("id", TypeId::Integer),
            Column::new("score", TypeId::Decimal),
        ]);
        let row = schema
            .conform(vec![Value::tinyint(1), Value::integer(3)])
            .unwrap();
        assert_eq!(row, vec![Value::Integer(1), Value::Decimal(3.0)]);
        assert!(
            schema
                .conform(vec![Value::null(TypeId::Integer), Value::decimal(1.0)])
                .is_err()
        );
        assert!(schema.conform(vec![Value::integer(1)]).is_err());
    }
}
