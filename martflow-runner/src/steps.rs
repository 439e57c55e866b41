//! Concrete pipeline steps against the three stores and the remote source.
//!
//! Each step opens the stores it touches through the [`StoreConnector`] and
//! drops them before returning, so no connection outlives a step.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use martflow_core::fetch::save_atomically;
use martflow_core::{
    move_table, normalize_dates, parse_table, pick_category, reload_tables, replace_with,
    route_category, route_source_file, sql, CategoryMart, PublicShareSource, ReqwestFetcher,
    SourceFetcher, SourceFileRoute, SqliteConnector, StoreConnector, StoreRole, SubCategorySales,
};

use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::error::StepError;
use crate::graph::StepId;
use crate::pipeline::{StepOutcome, StepRunner};

/// Placeholder shown when routing is asked to decide on an unset category.
const UNSET: &str = "<unset>";

pub struct EtlSteps {
    config: PipelineConfig,
    stores: Box<dyn StoreConnector>,
    source: Box<dyn SourceFetcher>,
    rng: StdRng,
}

impl EtlSteps {
    pub fn new(
        config: PipelineConfig,
        stores: Box<dyn StoreConnector>,
        source: Box<dyn SourceFetcher>,
        rng: StdRng,
    ) -> Self {
        Self {
            config,
            stores,
            source,
            rng,
        }
    }

    /// SQLite stores at the configured paths and the public-share downloader.
    ///
    /// `seed` fixes the category pick for reproducible runs.
    pub fn from_config(config: PipelineConfig, seed: Option<u64>) -> Result<Self, StepError> {
        let stores = SqliteConnector::new(
            config.store_path(StoreRole::Raw),
            config.store_path(StoreRole::Core),
            config.store_path(StoreRole::Mart),
        );
        let http = ReqwestFetcher::new(config.fetch_timeout())?;
        let source = PublicShareSource::new(http, config.fetch.resolve_endpoint.clone());
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self::new(config, Box::new(stores), Box::new(source), rng))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn prepare_storage(&self) -> Result<StepOutcome, StepError> {
        let dir = self.config.source_dir();
        fs::create_dir_all(&dir)
            .map_err(|e| StepError::io(format!("create {}", dir.display()), e))?;
        debug!(dir = %dir.display(), "storage ready");
        Ok(StepOutcome::Done)
    }

    fn check_source_file(&self) -> Result<StepOutcome, StepError> {
        let path = self.config.source_path();
        let next = match route_source_file(&path) {
            SourceFileRoute::UseExisting => StepId::AwaitFile,
            SourceFileRoute::Download => StepId::Download,
        };
        info!(path = %path.display(), next = %next, "source file checked");
        Ok(StepOutcome::Branch(next))
    }

    fn download(&self) -> Result<StepOutcome, StepError> {
        let path = self.config.source_path();
        let bytes = self.source.fetch_source(&self.config.share_token)?;
        // A body that does not parse never reaches the canonical path.
        parse_table(&bytes)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StepError::io(format!("create {}", parent.display()), e))?;
        }
        save_atomically(&path, &bytes)?;
        info!(source = self.source.name(), path = %path.display(), bytes = bytes.len(), "source saved");
        Ok(StepOutcome::Done)
    }

    fn await_file(&self) -> Result<StepOutcome, StepError> {
        let path = self.config.source_path();
        let timeout = Duration::from_secs(self.config.await_file.timeout_secs);
        let poke = Duration::from_secs(self.config.await_file.poke_interval_secs);
        wait_for_file(&path, timeout, poke)?;
        Ok(StepOutcome::Done)
    }

    fn load_raw(&self, ctx: &mut RunContext) -> Result<StepOutcome, StepError> {
        let path = self.config.source_path();
        let bytes =
            fs::read(&path).map_err(|e| StepError::io(format!("read {}", path.display()), e))?;
        let hash = blake3::hash(&bytes).to_hex().to_string();
        let data = parse_table(&bytes)?;

        let mut raw = self.stores.open(StoreRole::Raw)?;
        replace_with(raw.as_mut(), &self.config.raw_table, &data)?;

        ctx.source_hash = Some(hash);
        ctx.source_rows = Some(data.len());
        Ok(StepOutcome::Done)
    }

    fn normalize_dates(&self) -> Result<StepOutcome, StepError> {
        let mut raw = self.stores.open(StoreRole::Raw)?;
        let mut data = raw.query(&sql::select_all(&self.config.raw_table))?;
        let rewritten = normalize_dates(
            &mut data,
            &self.config.dates.columns,
            &self.config.dates.input_format,
        )?;
        if rewritten > 0 {
            replace_with(raw.as_mut(), &self.config.raw_table, &data)?;
        }
        info!(table = %self.config.raw_table, rewritten, "dates normalized");
        Ok(StepOutcome::Done)
    }

    fn migrate_raw_to_core(&self) -> Result<StepOutcome, StepError> {
        let query = sql::select_where_eq(
            &self.config.raw_table,
            &self.config.segment_column,
            &self.config.corporate_segment,
        );
        let mut raw = self.stores.open(StoreRole::Raw)?;
        let mut core = self.stores.open(StoreRole::Core)?;
        move_table(raw.as_mut(), &query, core.as_mut(), &self.config.raw_table)?;
        Ok(StepOutcome::Done)
    }

    fn populate_core_tables(&self) -> Result<StepOutcome, StepError> {
        let mut core = self.stores.open(StoreRole::Core)?;
        reload_tables(core.as_mut(), &self.config.core_tables)?;
        Ok(StepOutcome::Done)
    }

    fn build_yearly_mart(&self) -> Result<StepOutcome, StepError> {
        let mut core = self.stores.open(StoreRole::Core)?;
        let mut mart = self.stores.open(StoreRole::Mart)?;
        move_table(
            core.as_mut(),
            &self.config.yearly_mart_query,
            mart.as_mut(),
            &self.config.yearly_mart_table,
        )?;
        Ok(StepOutcome::Done)
    }

    fn pick_random_category(&mut self, ctx: &mut RunContext) -> Result<StepOutcome, StepError> {
        let mut core = self.stores.open(StoreRole::Core)?;
        let rows = core.query(&self.config.category_query)?.rows;
        let names: Vec<String> = rows
            .iter()
            .filter_map(|row| row.first().and_then(|v| v.as_text()).map(str::to_string))
            .collect();
        let dropped = rows.len() - names.len();
        if dropped > 0 {
            warn!(dropped, query = %self.config.category_query, "ignoring non-text category values");
        }
        let category = pick_category(&names, &mut self.rng).ok_or(StepError::NoCategories)?;
        info!(category = %category, candidates = names.len(), "category picked");
        ctx.category = Some(category);
        Ok(StepOutcome::Done)
    }

    fn route_category(&self, ctx: &RunContext) -> Result<StepOutcome, StepError> {
        let mart = route_category(ctx.category.as_deref().unwrap_or(UNSET))?;
        Ok(StepOutcome::Branch(StepId::for_mart(mart)))
    }

    fn category_mart(&self, mart: CategoryMart) -> Result<StepOutcome, StepError> {
        let spec = SubCategorySales {
            category: mart.category(),
            segment: self.config.corporate_segment.clone(),
            year: self.config.mart_year,
        }
        .spec();
        let mut core = self.stores.open(StoreRole::Core)?;
        let mut mart_store = self.stores.open(StoreRole::Mart)?;
        move_table(core.as_mut(), &spec.query, mart_store.as_mut(), &spec.table)?;
        Ok(StepOutcome::Done)
    }
}

impl StepRunner for EtlSteps {
    fn run(&mut self, step: StepId, ctx: &mut RunContext) -> Result<StepOutcome, StepError> {
        debug!(step = %step, "running step");
        match step {
            StepId::Start | StepId::End => Ok(StepOutcome::Done),
            StepId::PrepareStorage => self.prepare_storage(),
            StepId::CheckSourceFile => self.check_source_file(),
            StepId::Download => self.download(),
            StepId::AwaitFile => self.await_file(),
            StepId::LoadRaw => self.load_raw(ctx),
            StepId::NormalizeDates => self.normalize_dates(),
            StepId::MigrateRawToCore => self.migrate_raw_to_core(),
            StepId::PopulateCoreTables => self.populate_core_tables(),
            StepId::BuildYearlyMart => self.build_yearly_mart(),
            StepId::PickRandomCategory => self.pick_random_category(ctx),
            StepId::RouteCategory => self.route_category(ctx),
            StepId::FurnitureMart => self.category_mart(CategoryMart::FurnitureMart),
            StepId::OfficeMart => self.category_mart(CategoryMart::OfficeMart),
            StepId::TechMart => self.category_mart(CategoryMart::TechMart),
        }
    }
}

/// Poke for `path` every `poke` until `timeout` has elapsed.
///
/// A zero timeout is a single check.
pub fn wait_for_file(path: &Path, timeout: Duration, poke: Duration) -> Result<(), StepError> {
    let started = Instant::now();
    loop {
        if path.is_file() {
            debug!(path = %path.display(), "source file present");
            return Ok(());
        }
        let waited = started.elapsed();
        if waited >= timeout {
            return Err(StepError::SourceMissing {
                path: path.display().to_string(),
                waited_secs: waited.as_secs(),
            });
        }
        thread::sleep(poke.min(timeout - waited));
    }
}
