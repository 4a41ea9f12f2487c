//! On demand tile computation.
//!
//! A requested tile is looked up in the cache first. On a miss the band's
//! owner computes it: its reader, its virtual expression or the operator that
//! created the product. Source tiles needed on the way are requested through
//! the same scheduler, so every (band, rectangle) is computed at most once
//! while it stays cached.

mod cache;
mod graph;

use log::{debug, info, trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex, PoisonError, RwLock,
    },
    time::Duration,
};

use crate::{
    components::{
        Band, BandSource, BinaryOp, DataType, Expression, PixelBounds, Product, ProductId, Tile,
    },
    errors::{RasterOpsError, Result},
    operators::{
        ExecutionContext, MetadataTrigger, Operator, Parameters, PendingMetadata, SourceTiles,
        TargetTiles,
    },
    Indexes,
};
use cache::{TileCache, TileKey};

/// How often a waiting request looks at its cancellation token.
const WAIT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound of the tile cache. `None` keeps tiles until their product is disposed.
    pub cache_capacity_bytes: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Successful tile computations, reads included.
    pub computations: usize,
    pub hits: usize,
    pub misses: usize,
    pub cached_tiles: usize,
    pub cached_bytes: usize,
}

/// An attached operator and the product it reads from.
struct OperatorNode {
    operator: Operator,
    source: Arc<Product>,
    on_first_tile: Mutex<Vec<PendingMetadata>>,
}

/// Unit of computation. Operator bands are computed together,
/// so their jobs carry no band.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct JobKey {
    product: ProductId,
    band: Option<Arc<str>>,
    bounds: PixelBounds,
}

type JobOutcome = Result<Vec<Arc<Tile>>>;

/// Outcome of an in-flight computation, shared with everyone waiting on it.
#[derive(Default)]
struct Job {
    outcome: Mutex<Option<JobOutcome>>,
    ready: Condvar,
}

impl Job {
    fn complete(&self, outcome: JobOutcome) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        self.ready.notify_all();
    }

    /// Blocks until completion, or until `ctx` is cancelled.
    fn wait(&self, ctx: &ExecutionContext) -> Result<JobOutcome> {
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = outcome.as_ref() {
                return Ok(outcome.clone());
            }
            ctx.check_cancelled()?;
            outcome = self
                .ready
                .wait_timeout(outcome, WAIT_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Ownership of an in-flight job. Dropping it without
/// [JobGuard::finish] releases the waiters with an error.
struct JobGuard<'a> {
    jobs: &'a Mutex<HashMap<JobKey, Arc<Job>>>,
    key: JobKey,
    job: Arc<Job>,
    finished: bool,
}

impl JobGuard<'_> {
    fn finish(mut self, outcome: JobOutcome) {
        self.release(outcome);
        self.finished = true;
    }

    fn release(&self, outcome: JobOutcome) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        self.job.complete(outcome);
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let band = self.key.band.as_deref().unwrap_or("<operator>").to_string();
            self.release(Err(RasterOpsError::computation(band, "computation panicked")));
        }
    }
}

enum Role<'a> {
    Owner(JobGuard<'a>),
    Waiter(Arc<Job>),
}

/// Resolves tile requests, computing and caching tiles on demand.
pub struct TileScheduler {
    config: SchedulerConfig,
    cache: Mutex<TileCache>,
    operators: RwLock<HashMap<ProductId, Arc<OperatorNode>>>,
    jobs: Mutex<HashMap<JobKey, Arc<Job>>>,
    computations: AtomicUsize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl Default for TileScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl TileScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            cache: Mutex::new(TileCache::new(config.cache_capacity_bytes)),
            config,
            operators: RwLock::default(),
            jobs: Mutex::default(),
            computations: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Initializes `operator` on `source` and makes it the owner of the
    /// returned target product.
    pub fn attach(
        &self,
        mut operator: Operator,
        source: Arc<Product>,
        parameters: &Parameters,
    ) -> Result<Arc<Product>> {
        source.ensure_alive()?;
        let initialization = operator.initialize(&source, parameters)?;
        let target = Arc::new(initialization.target);
        let (now, later): (Vec<_>, Vec<_>) = initialization
            .pending
            .into_iter()
            .partition(|pending| pending.trigger == MetadataTrigger::Attached);
        now.iter().for_each(|pending| pending.apply(&target));
        info!(
            "attached {} to '{}', target '{}'",
            operator.alias(),
            source.name(),
            target.name()
        );
        let node = OperatorNode {
            operator,
            source,
            on_first_tile: Mutex::new(later),
        };
        self.operators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.id(), Arc::new(node));
        Ok(target)
    }

    /// Tile of `band` over `bounds`, computed if not cached.
    pub fn tile(
        &self,
        product: &Arc<Product>,
        band: &str,
        bounds: &PixelBounds,
        ctx: &ExecutionContext,
    ) -> Result<Arc<Tile>> {
        product.ensure_alive()?;
        ctx.check_cancelled()?;
        let band = product.band(band)?;
        if !band.bounds().contains_bounds(bounds) {
            return Err(RasterOpsError::OutOfBounds {
                x: bounds.x() + bounds.width(),
                y: bounds.y() + bounds.height(),
                bounds: band.bounds(),
            });
        }

        let key = TileKey::new(product.id(), band.shared_name(), *bounds);
        if let Some(tile) = self.lock_cache().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("cache hit {key:?}");
            return Ok(tile);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.check_acyclic(product, band.name())?;

        let job = JobKey {
            product: product.id(),
            band: match band.source() {
                BandSource::Operator => None,
                _ => Some(band.shared_name()),
            },
            bounds: *bounds,
        };
        let tiles = self.run_job(product, job, &key, ctx, || {
            let tiles = self.compute(product, &band, bounds, ctx)?;
            product.ensure_alive()?;
            Ok(tiles)
        })?;
        tiles
            .into_iter()
            .find(|tile| tile.band_name() == band.name())
            .ok_or_else(|| RasterOpsError::computation(band.name(), "not computed by its owner"))
    }

    /// Tiles of several bands over the same `bounds`.
    pub fn tiles(
        &self,
        product: &Arc<Product>,
        bands: &[&str],
        bounds: &PixelBounds,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Arc<Tile>>> {
        bands
            .iter()
            .map(|band| self.tile(product, band, bounds, ctx))
            .collect()
    }

    /// Computes every tile of the selected bands over a grid of `tile_shape`,
    /// in parallel. Tiles are returned band by band, rows first.
    pub fn compute_product(
        &self,
        product: &Arc<Product>,
        selection: Indexes,
        tile_shape: (usize, usize),
        ctx: &ExecutionContext,
    ) -> Result<Vec<Arc<Tile>>> {
        product.ensure_alive()?;
        let requests: Vec<(Arc<Band>, PixelBounds)> = product
            .select_bands(selection)
            .into_iter()
            .flat_map(|band| {
                band.bounds()
                    .grid(tile_shape)
                    .into_iter()
                    .map(move |bounds| (Arc::clone(&band), bounds))
            })
            .collect();
        info!(
            "computing {} tiles of '{}'",
            requests.len(),
            product.name()
        );
        let task = ctx.task(&format!("Computing {}", product.name()), requests.len());
        let tile_ctx = ctx.for_sources();
        requests
            .par_iter()
            .map(|(band, bounds)| {
                self.tile(product, band.name(), bounds, &tile_ctx)
                    .inspect(|_| task.worked(1))
            })
            .collect()
    }

    /// Boolean raster of the product mask `name`, 1 where the expression holds.
    /// Masks are evaluated on each call, not cached.
    pub fn mask(
        &self,
        product: &Arc<Product>,
        name: &str,
        bounds: &PixelBounds,
        ctx: &ExecutionContext,
    ) -> Result<Tile> {
        product.ensure_alive()?;
        let mask = product
            .mask(name)
            .ok_or_else(|| RasterOpsError::UnknownBand {
                product: product.name().to_string(),
                band: name.to_string(),
            })?;
        if !product.bounds().contains_bounds(bounds) {
            return Err(RasterOpsError::OutOfBounds {
                x: bounds.x() + bounds.width(),
                y: bounds.y() + bounds.height(),
                bounds: product.bounds(),
            });
        }
        let expression: Expression = mask.expression.parse()?;
        let expression = Expression::binary(BinaryOp::Ne, expression, Expression::Constant(0.));
        self.evaluate(product, name, DataType::UInt8, &expression, bounds, ctx)
    }

    /// Cached tile, without computing it.
    pub fn cached(&self, product: &Product, band: &str, bounds: &PixelBounds) -> Option<Arc<Tile>> {
        self.lock_cache()
            .peek(&TileKey::new(product.id(), band, *bounds))
    }

    /// Evicts the tiles of `product`, detaches its operator and disposes it.
    pub fn dispose(&self, product: &Product) {
        let evicted = {
            let mut cache = self.lock_cache();
            // Owners look at the flag under this lock before caching.
            product.dispose();
            cache.remove_product(product.id())
        };
        let detached = self
            .operators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&product.id())
            .is_some();
        info!(
            "disposed '{}': {evicted} tiles evicted{}",
            product.name(),
            if detached { ", operator detached" } else { "" }
        );
    }

    pub fn stats(&self) -> SchedulerStats {
        let cache = self.lock_cache();
        SchedulerStats {
            computations: self.computations.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cached_tiles: cache.len(),
            cached_bytes: cache.size_in_bytes(),
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, TileCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `compute` unless an equal job is in flight, in which case its outcome is shared.
    fn run_job(
        &self,
        product: &Product,
        key: JobKey,
        requested: &TileKey,
        ctx: &ExecutionContext,
        compute: impl Fn() -> Result<Vec<Tile>>,
    ) -> JobOutcome {
        loop {
            ctx.check_cancelled()?;
            let role = {
                let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
                // Owners cache before leaving the job table, so a finished job is found here.
                if let Some(tile) = self.lock_cache().get(requested) {
                    return Ok(vec![tile]);
                }
                match jobs.get(&key) {
                    Some(job) => Role::Waiter(Arc::clone(job)),
                    None => {
                        let job = Arc::new(Job::default());
                        jobs.insert(key.clone(), Arc::clone(&job));
                        Role::Owner(JobGuard {
                            jobs: &self.jobs,
                            key: key.clone(),
                            job,
                            finished: false,
                        })
                    }
                }
            };

            match role {
                Role::Owner(guard) => {
                    let outcome: JobOutcome =
                        compute().map(|tiles| tiles.into_iter().map(Arc::new).collect());
                    match &outcome {
                        Ok(tiles) => {
                            self.computations.fetch_add(1, Ordering::Relaxed);
                            let mut cache = self.lock_cache();
                            // Checked under the cache lock, which dispose takes to evict.
                            if product.is_disposed() {
                                debug!("{key:?} finished after its product was disposed");
                            } else {
                                for tile in tiles {
                                    let key =
                                        TileKey::new(key.product, tile.band_name(), *tile.bounds());
                                    cache.insert(key, Arc::clone(tile));
                                }
                            }
                        }
                        Err(err) if err.is_cancelled() => debug!("{key:?} cancelled"),
                        Err(err) => warn!("{key:?} failed: {err}"),
                    }
                    guard.finish(outcome.clone());
                    return outcome;
                }
                Role::Waiter(job) => match job.wait(ctx)? {
                    Err(err) if err.is_cancelled() => {
                        debug!("owner of {key:?} was cancelled, retrying");
                    }
                    outcome => return outcome,
                },
            }
        }
    }

    fn compute(
        &self,
        product: &Arc<Product>,
        band: &Band,
        bounds: &PixelBounds,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Tile>> {
        match band.source() {
            BandSource::Reader(reader) => {
                let mut tile = Tile::new(band.shared_name(), band.data_type(), *bounds);
                reader.read_into(bounds, tile.data_mut())?;
                trace!("read '{}' {bounds:?}", band.name());
                Ok(vec![tile])
            }
            BandSource::Virtual(expression) => Ok(vec![self.evaluate(
                product,
                band.name(),
                band.data_type(),
                expression,
                bounds,
                ctx,
            )?]),
            BandSource::Operator => self.compute_operator(product, bounds, ctx),
        }
    }

    fn compute_operator(
        &self,
        product: &Arc<Product>,
        bounds: &PixelBounds,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Tile>> {
        let node = self
            .operators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&product.id())
            .cloned()
            .ok_or_else(|| RasterOpsError::computation(product.name(), "no operator attached"))?;
        node.source.ensure_alive()?;

        let target_bands = product
            .bands()
            .into_iter()
            .filter(|band| {
                matches!(band.source(), BandSource::Operator)
                    && band.bounds().contains_bounds(bounds)
            })
            .collect();
        let mut targets = TargetTiles::new(target_bands, bounds);
        let sources = SourceTiles::new(self, &node.source, ctx);
        debug!(
            "computing {} of '{}' over {bounds:?}",
            node.operator.alias(),
            product.name()
        );
        node.operator
            .compute(&mut targets, bounds, &sources, ctx)
            .map_err(|err| match err {
                RasterOpsError::Cancelled
                | RasterOpsError::Disposed(_)
                | RasterOpsError::Computation { .. }
                | RasterOpsError::CyclicDependency { .. }
                | RasterOpsError::InvalidSource { .. } => err,
                err => RasterOpsError::computation(node.operator.alias(), err),
            })?;

        let pending = std::mem::take(
            &mut *node
                .on_first_tile
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        pending.iter().for_each(|pending| pending.apply(product));
        Ok(targets.into_tiles())
    }

    /// Evaluates `expression` per pixel over same-rectangle source tiles.
    fn evaluate(
        &self,
        product: &Arc<Product>,
        name: &str,
        data_type: DataType,
        expression: &Expression,
        bounds: &PixelBounds,
        ctx: &ExecutionContext,
    ) -> Result<Tile> {
        let compiled = expression.compile(product)?;
        let source_ctx = ctx.for_sources();
        let sources = compiled
            .bands()
            .iter()
            .map(|band| self.tile(product, band, bounds, &source_ctx))
            .collect::<Result<Vec<_>>>()?;
        let mut tile = Tile::new(name, data_type, *bounds);
        let mut samples = vec![0.; sources.len()];
        for y in bounds.rows() {
            ctx.check_cancelled()?;
            for x in bounds.cols() {
                for (sample, source) in samples.iter_mut().zip(&sources) {
                    *sample = source.get(x, y)?;
                }
                tile.set(x, y, compiled.eval(&samples))?;
            }
        }
        Ok(tile)
    }

    fn check_acyclic(&self, product: &Arc<Product>, band: &str) -> Result<()> {
        let operators = self.operators.read().unwrap_or_else(PoisonError::into_inner);
        let dependencies = |product: &Arc<Product>, band: &str| -> Vec<graph::Node> {
            let Ok(band) = product.band(band) else {
                return Vec::new();
            };
            match band.source() {
                BandSource::Reader(_) => Vec::new(),
                BandSource::Virtual(expression) => expression
                    .references()
                    .into_iter()
                    .map(|name| (Arc::clone(product), name.to_string()))
                    .collect(),
                BandSource::Operator => operators
                    .get(&product.id())
                    .map(|node| {
                        node.operator
                            .source_bands()
                            .into_iter()
                            .map(|name| (Arc::clone(&node.source), name))
                            .collect()
                    })
                    .unwrap_or_default(),
            }
        };
        match graph::find_cycle((Arc::clone(product), band.to_string()), dependencies) {
            Some(band) => Err(RasterOpsError::CyclicDependency { band }),
            None => Ok(()),
        }
    }
}
