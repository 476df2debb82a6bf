//! Native functions generated code calls
//!
//! Every runtime entry point the translators use is registered through one
//! accessor here, so a symbol always maps to the same native. A few thin
//! adapters cover conversions the proxy layer does not express directly
//! (optional tile groups, `usize` counts).

use super::code_context::CodeContext;
use crate::error::{Error, Result};
use crate::executor::ExecutorContext;
use crate::proxy::{FunctionId, Mut, Ref, Tuple};
use crate::runtime::{
    BloomFilter, CCHashTable, CountDown, Deleter, ExecutorThreadPool, GlobalAggregator,
    IndexScanIterator, Inserter, RuntimeState, SelectionVector, Sorter, TaskInfo, Updater, consumer_consume,
    hash::hash_key,
};
use crate::storage::{DataTable, TileGroup};
use std::sync::Arc;

/// Table `oid` of the executing database
pub fn storage_table(ctx: Arc<ExecutorContext>, oid: u32) -> Result<Arc<DataTable>> {
    ctx.storage().table(oid)
}

/// Tuple slots in use per tile group, captured before a scan starts
///
/// Versions appended while the scan runs lie past these bounds and are not
/// revisited.
pub fn table_scan_bounds(table: Arc<DataTable>) -> Vec<u32> {
    (0..table.tile_group_count())
        .map(|offset| table.tile_group(offset).map_or(0, |tg| tg.next_tuple_slot()))
        .collect()
}

/// Tile group at `offset` within the table
pub fn table_tile_group(table: Arc<DataTable>, offset: u32) -> Result<Arc<TileGroup>> {
    table
        .tile_group(offset)
        .ok_or_else(|| Error::storage(format!("{} has no tile group at offset {offset}", table.name())))
}

/// Hash of a composite key
pub fn hash_tuple(key: Tuple) -> u64 {
    hash_key(key.values())
}

/// Split `num_tile_groups` into tasks for the pool's workers
pub fn scan_tasks(pool: Arc<ExecutorThreadPool>, num_tile_groups: u32, min_per_task: u32) -> Vec<Arc<TaskInfo>> {
    let workers = u32::try_from(pool.num_workers()).unwrap_or(u32::MAX);
    TaskInfo::partition(num_tile_groups, workers, min_per_task)
        .into_iter()
        .map(Arc::new)
        .collect()
}

/// Arm a latch for `count` tasks
pub fn count_down_init(latch: &mut CountDown, count: u32) {
    latch.init(u64::from(count));
}

macro_rules! natives {
    (@register $code:ident, free, $symbol:literal, $f:expr) => {
        $code.register($symbol, $f)
    };
    (@register $code:ident, $recv:ty, $marker:ty, $symbol:literal, $f:expr) => {
        $code.register_member::<$recv, $marker, _, _>($symbol, $f)
    };
    ($($(#[$meta:meta])* $name:ident => $symbol:literal, [$($kind:tt)*] $f:expr;)*) => {
        impl CodeContext {
            $(
                #[doc = concat!("Register `", $symbol, "`")]
                $(#[$meta])*
                pub fn $name(&mut self) -> FunctionId {
                    let code = self;
                    natives!(@register code, $($kind)*, $symbol, $f)
                }
            )*
        }
    };
}

natives! {
    storage_table_fn => "storage_table", [free] storage_table;
    scan_bounds_fn => "table_scan_bounds", [free] table_scan_bounds;
    tile_group_at_fn => "table_tile_group", [free] table_tile_group;
    hash_tuple_fn => "hash_tuple", [free] hash_tuple;
    scan_tasks_fn => "scan_tasks", [free] scan_tasks;
    consume_fn => "consumer_consume", [free] consumer_consume;

    tile_group_id_fn => "TileGroup::id", [TileGroup, Ref] TileGroup::id;
    tile_group_value_fn => "TileGroup::value", [TileGroup, Ref] TileGroup::value;
    tile_group_by_id_fn => "DataTable::tile_group_by_id", [DataTable, Ref] DataTable::tile_group_by_id;
    table_index_fn => "DataTable::index", [DataTable, Ref] DataTable::index;

    ctx_param_fn => "ExecutorContext::param", [ExecutorContext, Ref] ExecutorContext::param;
    ctx_increment_processed_fn => "ExecutorContext::increment_processed", [ExecutorContext, Ref] ExecutorContext::increment_processed;
    ctx_num_processed_fn => "ExecutorContext::num_processed", [ExecutorContext, Ref] ExecutorContext::num_processed;
    ctx_has_thread_pool_fn => "ExecutorContext::has_thread_pool", [ExecutorContext, Ref] ExecutorContext::has_thread_pool;
    ctx_thread_pool_fn => "ExecutorContext::require_thread_pool", [ExecutorContext, Ref] ExecutorContext::require_thread_pool;

    submit_task_fn => "ExecutorThreadPool::submit_task", [ExecutorThreadPool, Ref] ExecutorThreadPool::submit_task;
    raise_task_error_fn => "RuntimeState::raise_task_error", [RuntimeState, Ref] RuntimeState::raise_task_error;

    count_down_init_fn => "CountDown::init", [CountDown, Mut] count_down_init;
    count_down_decrease_fn => "CountDown::decrease", [CountDown, Ref] CountDown::decrease;
    count_down_wait_fn => "CountDown::wait", [CountDown, Ref] CountDown::wait;
    count_down_destroy_fn => "CountDown::destroy", [CountDown, Mut] CountDown::destroy;

    selection_init_fn => "SelectionVector::init", [SelectionVector, Mut] SelectionVector::init;
    selection_filter_fn => "SelectionVector::filter_visible", [SelectionVector, Mut] SelectionVector::filter_visible;
    selection_get_fn => "SelectionVector::get", [SelectionVector, Ref] SelectionVector::get;

    index_iter_init_fn => "IndexScanIterator::init", [IndexScanIterator, Mut] IndexScanIterator::init;
    index_iter_scan_fn => "IndexScanIterator::do_scan", [IndexScanIterator, Mut] IndexScanIterator::do_scan;
    index_iter_groups_fn => "IndexScanIterator::num_tile_groups", [IndexScanIterator, Ref] IndexScanIterator::num_tile_groups;
    index_iter_group_id_fn => "IndexScanIterator::tile_group_id", [IndexScanIterator, Ref] IndexScanIterator::tile_group_id;
    index_iter_min_fn => "IndexScanIterator::min_offset", [IndexScanIterator, Ref] IndexScanIterator::min_offset;
    index_iter_max_fn => "IndexScanIterator::max_offset", [IndexScanIterator, Ref] IndexScanIterator::max_offset;
    index_iter_row_fn => "IndexScanIterator::row_offset_in_result", [IndexScanIterator, Ref] IndexScanIterator::row_offset_in_result;

    inserter_init_fn => "Inserter::init", [Inserter, Mut] Inserter::init;
    inserter_insert_fn => "Inserter::insert", [Inserter, Mut] Inserter::insert;
    inserter_tear_down_fn => "Inserter::tear_down", [Inserter, Mut] Inserter::tear_down;

    deleter_init_fn => "Deleter::init", [Deleter, Mut] Deleter::init;
    deleter_delete_fn => "Deleter::delete", [Deleter, Mut] Deleter::delete;
    deleter_tear_down_fn => "Deleter::tear_down", [Deleter, Mut] Deleter::tear_down;

    updater_init_fn => "Updater::init", [Updater, Mut] Updater::init;
    updater_update_fn => "Updater::update", [Updater, Mut] Updater::update;
    updater_update_pk_fn => "Updater::update_pk", [Updater, Mut] Updater::update_pk;
    updater_tear_down_fn => "Updater::tear_down", [Updater, Mut] Updater::tear_down;

    hash_table_init_fn => "CCHashTable::init", [CCHashTable, Mut] CCHashTable::init;
    hash_table_insert_fn => "CCHashTable::insert", [CCHashTable, Mut] CCHashTable::insert;
    hash_table_probe_fn => "CCHashTable::probe", [CCHashTable, Ref] CCHashTable::probe;
    hash_table_advance_group_fn => "CCHashTable::advance_group", [CCHashTable, Mut] CCHashTable::advance_group;
    hash_table_group_results_fn => "CCHashTable::group_results", [CCHashTable, Ref] CCHashTable::group_results;
    hash_table_destroy_fn => "CCHashTable::destroy", [CCHashTable, Mut] CCHashTable::destroy;

    bloom_init_fn => "BloomFilter::init", [BloomFilter, Mut] BloomFilter::init;
    bloom_add_fn => "BloomFilter::add_key", [BloomFilter, Mut] BloomFilter::add_key;
    bloom_contains_fn => "BloomFilter::contains_key", [BloomFilter, Ref] BloomFilter::contains_key;
    bloom_destroy_fn => "BloomFilter::destroy", [BloomFilter, Mut] BloomFilter::destroy;

    aggregator_init_fn => "GlobalAggregator::init", [GlobalAggregator, Mut] GlobalAggregator::init;
    aggregator_advance_fn => "GlobalAggregator::advance", [GlobalAggregator, Mut] GlobalAggregator::advance;
    aggregator_result_fn => "GlobalAggregator::result", [GlobalAggregator, Ref] GlobalAggregator::result;

    sorter_init_fn => "Sorter::init", [Sorter, Mut] Sorter::init;
    sorter_append_fn => "Sorter::append", [Sorter, Mut] Sorter::append;
    sorter_sort_fn => "Sorter::sort", [Sorter, Mut] Sorter::sort;
    sorter_num_rows_fn => "Sorter::num_rows", [Sorter, Ref] Sorter::num_rows;
    sorter_row_fn => "Sorter::row", [Sorter, Ref] Sorter::row;
    sorter_destroy_fn => "Sorter::destroy", [Sorter, Mut] Sorter::destroy;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_are_idempotent() {
        let mut code = CodeContext::new("m");
        let first = code.tile_group_value_fn();
        let again = code.tile_group_value_fn();
        assert_eq!(first, again);
        let deleter = code.deleter_delete_fn();
        assert_ne!(first, deleter);
    }

    #[test]
    fn test_member_signature_has_receiver() {
        let mut code = CodeContext::new("m");
        let id = code.updater_update_fn();
        let (natives, _) = code.registries();
        // receiver, tile group id, offset, values
        assert_eq!(natives.get(id).unwrap().signature().arity(), 4);
    }

    #[test]
    fn test_scan_bounds_snapshot() {
        use crate::storage::{Column, Schema, StorageManager};
        use crate::types::TypeId;

        let storage = StorageManager::new(1, 4);
        let table = storage
            .create_table("t", Schema::new(vec![Column::new("a", TypeId::Integer)]))
            .unwrap();
        assert!(table_scan_bounds(table.clone()).iter().all(|&n| n == 0));
        assert!(table_tile_group(table, 99).is_err());
    }
}
