//! Plan to compiled query
//!
//! Compilation builds the translator tree (which reserves all runtime
//! state), then emits three functions:
//!
//! - `init` binds every referenced table into its state slot and runs each
//!   operator's state setup,
//! - `plan` drives the root pipeline; for queries returning rows the root
//!   consumer hands each row to the result consumer and counts it,
//! - `tear_down` releases operator state.
//!
//! Parallel scan tasks become additional functions of the same module.

use super::builder::FunctionBuilder;
use super::cache::{CacheKey, QueryCache};
use super::compilation_context::CompilationContext;
use super::ir::IrFunction;
use super::query::{BoundSlots, CompileStats, CompiledQuery, EntryPoints};
use super::translator::{self, OperatorTranslator};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::planner::PlanNode;
use crate::storage::StorageManager;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Compiles bound plans against one catalog
pub struct QueryCompiler {
    config: EngineConfig,
    config_hash: u64,
    storage: Arc<StorageManager>,
    cache: QueryCache,
}

impl QueryCompiler {
    /// Compiler for `storage`; the cache holds `config.query_cache_capacity`
    /// queries
    pub fn new(config: EngineConfig, storage: Arc<StorageManager>) -> Self {
        let config_hash = bincode::serialize(&config).map_or(0, |bytes| xxh3_64(&bytes));
        let cache = QueryCache::new(config.query_cache_capacity);
        Self {
            config,
            config_hash,
            storage,
            cache,
        }
    }

    /// Configuration queries are compiled for
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compiled query cache
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Compile `plan`, reusing a cached query for an equivalent plan
    pub fn compile_or_get(&self, plan: &PlanNode) -> Result<Arc<CompiledQuery>> {
        let key = CacheKey {
            plan: plan.fingerprint()?,
            config: self.config_hash,
        };
        if let Some(query) = self.cache.get(key) {
            debug!(fingerprint = key.plan, "query cache hit");
            return Ok(query);
        }
        let query = Arc::new(self.compile(plan)?);
        self.cache.insert(key, query.clone());
        Ok(query)
    }

    /// Compile `plan` without consulting the cache
    pub fn compile(&self, plan: &PlanNode) -> Result<CompiledQuery> {
        self.config.validate()?;
        let start = Instant::now();
        let fingerprint = plan.fingerprint()?;
        let name = format!("query_{fingerprint:016x}");
        let mut cx = CompilationContext::new(&name, self.storage.clone(), self.config.clone());
        let parallel = self.config.parallel_scan && translator::parallel_safe(plan);
        let root = translator::build(plan, &mut cx, parallel)?;
        let emits_rows = !plan.is_mutating();
        let setup_ms = elapsed_ms(start);

        let start = Instant::now();
        let entry = EntryPoints {
            init: cx.code().reserve(),
            plan: cx.code().reserve(),
            tear_down: cx.code().reserve(),
        };
        let init = emit_init(&mut cx, root.as_ref(), &name)?;
        cx.code().define(entry.init, init)?;
        let body = emit_plan(&mut cx, root.as_ref(), &name, emits_rows)?;
        cx.code().define(entry.plan, body)?;
        let tear_down = emit_tear_down(&mut cx, root.as_ref(), &name)?;
        cx.code().define(entry.tear_down, tear_down)?;
        let ir_gen_ms = elapsed_ms(start);

        let start = Instant::now();
        let slots = BoundSlots {
            ctx: cx.ctx_slot(),
            consumer: cx.consumer_slot(),
        };
        let output_types = if emits_rows {
            root.output_types().to_vec()
        } else {
            Vec::new()
        };
        let (mut code, state) = cx.into_parts();
        let layout = state.finalize(code.types(), &format!("{name}_state"));
        let (module, _) = code.finish()?;
        let stats = CompileStats {
            setup_ms,
            ir_gen_ms,
            jit_ms: elapsed_ms(start),
        };
        info!(
            query = %name,
            root = root.name(),
            parallel,
            functions = module.functions().len(),
            state_slots = layout.len(),
            total_ms = stats.total_ms(),
            "compiled query"
        );
        debug!(plan = %plan.explain(), "compiled plan");
        Ok(CompiledQuery::new(
            module,
            entry,
            slots,
            layout,
            output_types,
            fingerprint,
            stats,
        ))
    }
}

fn emit_init(cx: &mut CompilationContext, root: &dyn OperatorTranslator, name: &str) -> Result<IrFunction> {
    let mut b = FunctionBuilder::new(format!("{name}_init"), 0);
    let tables: Vec<_> = cx.tables().collect();
    let lookup = cx.code().storage_table_fn();
    for (oid, slot) in tables {
        let ctx = cx.load_ctx(&mut b);
        let oid = b.const_u32(oid);
        let table = b.call(lookup, &[ctx, oid]);
        b.store_state(slot, table);
    }
    root.initialize_state(cx, &mut b)?;
    b.ret(None);
    b.finish()
}

fn emit_plan(
    cx: &mut CompilationContext,
    root: &dyn OperatorTranslator,
    name: &str,
    emits_rows: bool,
) -> Result<IrFunction> {
    let mut b = FunctionBuilder::new(format!("{name}_plan"), 0);
    let root_name = root.name();
    root.produce(cx, &mut b, &mut |cx, b, row| {
        if !emits_rows {
            return Err(Error::codegen(format!("{root_name} produced rows for a data-modifying query")));
        }
        let tuple = b.make_tuple(&row.columns);
        let consumer = cx.load_consumer(b);
        let consume = cx.code().consume_fn();
        b.call_void(consume, &[consumer, tuple]);
        let ctx = cx.load_ctx(b);
        let increment = cx.code().ctx_increment_processed_fn();
        b.call_void(increment, &[ctx]);
        Ok(())
    })?;
    let ctx = cx.load_ctx(&mut b);
    let num_processed = cx.code().ctx_num_processed_fn();
    let processed = b.call(num_processed, &[ctx]);
    b.ret(Some(processed));
    b.finish()
}

fn emit_tear_down(
    cx: &mut CompilationContext,
    root: &dyn OperatorTranslator,
    name: &str,
) -> Result<IrFunction> {
    let mut b = FunctionBuilder::new(format!("{name}_tear_down"), 0);
    root.tear_down_state(cx, &mut b)?;
    b.ret(None);
    b.finish()
}
