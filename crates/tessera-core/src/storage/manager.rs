//! Table registry and tile-group catalog

use super::{DataTable, Oid, Schema, TileGroup};
use crate::error::{Error, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Global map from tile group id to tile group
#[derive(Debug, Default)]
pub struct TileGroupCatalog {
    tile_groups: DashMap<Oid, Arc<TileGroup>>,
    next_id: AtomicU32,
}

impl TileGroupCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a tile group with a fresh id
    pub fn allocate(&self, db_oid: Oid, table_oid: Oid, capacity: u32) -> Arc<TileGroup> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tile_group = Arc::new(TileGroup::new(id, db_oid, table_oid, capacity));
        self.tile_groups.insert(id, tile_group.clone());
        tile_group
    }

    /// Look up a tile group
    pub fn get(&self, id: Oid) -> Option<Arc<TileGroup>> {
        self.tile_groups.get(&id).map(|tg| tg.clone())
    }

    /// Registered tile groups
    pub fn len(&self) -> usize {
        self.tile_groups.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.tile_groups.is_empty()
    }
}

/// Owner of every table of one database
#[derive(Debug)]
pub struct StorageManager {
    db_oid: Oid,
    tuples_per_tile_group: u32,
    tables: DashMap<Oid, Arc<DataTable>>,
    names: DashMap<String, Oid>,
    next_table_oid: AtomicU32,
    catalog: Arc<TileGroupCatalog>,
}

crate::proxy_opaque!(StorageManager => "StorageManager");

impl StorageManager {
    /// Empty database whose tables use tile groups of `tuples_per_tile_group`
    pub fn new(db_oid: Oid, tuples_per_tile_group: u32) -> Self {
        Self {
            db_oid,
            tuples_per_tile_group: tuples_per_tile_group.max(1),
            tables: DashMap::new(),
            names: DashMap::new(),
            next_table_oid: AtomicU32::new(1),
            catalog: Arc::new(TileGroupCatalog::new()),
        }
    }

    /// Database id
    pub fn database_oid(&self) -> Oid {
        self.db_oid
    }

    /// Create a table; names are unique per database
    pub fn create_table(&self, name: &str, schema: Schema) -> Result<Arc<DataTable>> {
        if schema.column_count() == 0 {
            return Err(Error::catalog(format!("table '{name}' has no columns")));
        }
        let oid = match self.names.entry(name.to_string()) {
            Entry::Occupied(_) => {
                return Err(Error::catalog(format!("table '{name}' already exists")));
            }
            Entry::Vacant(slot) => {
                let oid = self.next_table_oid.fetch_add(1, Ordering::Relaxed);
                slot.insert(oid);
                oid
            }
        };
        let table = Arc::new(DataTable::new(
            self.db_oid,
            oid,
            name,
            schema,
            self.tuples_per_tile_group,
            self.catalog.clone(),
        ));
        self.tables.insert(oid, table.clone());
        debug!(table = name, oid, "created table");
        Ok(table)
    }

    /// Table by id
    pub fn table(&self, oid: Oid) -> Result<Arc<DataTable>> {
        self.tables
            .get(&oid)
            .map(|t| t.clone())
            .ok_or_else(|| Error::catalog(format!("no table with oid {oid}")))
    }

    /// Table by name
    pub fn table_by_name(&self, name: &str) -> Result<Arc<DataTable>> {
        let oid = self
            .names
            .get(name)
            .map(|oid| *oid)
            .ok_or_else(|| Error::catalog(format!("no table named '{name}'")))?;
        self.table(oid)
    }

    /// Tile group by global id
    pub fn tile_group(&self, id: Oid) -> Option<Arc<TileGroup>> {
        self.catalog.get(id)
    }

    /// Tile-group catalog shared by all tables
    pub fn catalog(&self) -> &Arc<TileGroupCatalog> {
        &self.catalog
    }

    /// Number of tables
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Column;
    use crate::types::TypeId;

    fn schema() -> Schema {
        Schema::new(vec![Column::new("a", TypeId::Integer)])
    }

    #[test]
    fn test_create_and_lookup_tables() {
        let storage = StorageManager::new(7, 4);
        let t = storage.create_table("t", schema()).unwrap();
        assert_eq!(storage.table_by_name("t").unwrap().oid(), t.oid());
        assert_eq!(storage.table(t.oid()).unwrap().name(), "t");
        assert!(matches!(storage.create_table("t", schema()), Err(Error::Catalog(_))));
        assert!(storage.table_by_name("missing").is_err());
        assert!(storage.create_table("empty", Schema::default()).is_err());
    }

    #[test]
    fn test_tile_group_ids_are_global() {
        let storage = StorageManager::new(0, 4);
        let a = storage.create_table("a", schema()).unwrap();
        let b = storage.create_table("b", schema()).unwrap();
        let ta = a.tile_group(0).unwrap();
        let tb = b.tile_group(0).unwrap();
        assert_ne!(ta.id(), tb.id());
        assert_eq!(storage.tile_group(tb.id()).unwrap().table_oid(), b.oid());
    }
}
