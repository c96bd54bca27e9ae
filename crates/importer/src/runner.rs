use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use catalink_core::association::{AssociationOutcome, AssociationResolver, CatalogSnapshot};
use catalink_core::config::AppConfig;
use catalink_core::domain::product::{canonical_name, ProductId};
use catalink_core::domain::provider::{
    AssociationStrategy, DataProviderAttribute, DataProviderProduct, ProviderKey,
};
use catalink_core::import::{ImportResult, ImportTally, RecordError, RecordErrorKind, RecordOutcome};
use catalink_core::normalizer::{NormalizedRecord, Normalizer};
use catalink_db::{DataProviderProductRepository, ProductRepository, RepositoryError};

use crate::error::RunError;
use crate::locks::KeyedLocks;
use crate::source::ImportSource;

#[derive(Clone, Debug)]
pub struct ImportSettings {
    pub provider_id: String,
    pub workers: usize,
    pub timeout: Duration,
    pub attribute_threshold: f64,
    pub enrich_attributes: Vec<String>,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ImportSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            provider_id: config.import.provider_id.clone(),
            workers: config.import.workers,
            timeout: Duration::from_secs(config.import.timeout_secs),
            attribute_threshold: config.matching.attribute_threshold,
            enrich_attributes: config.import.enrich_attributes.clone(),
        }
    }
}

/// Drives normalize → resolve → upsert for every record of a payload.
///
/// Records run on a bounded pool of tasks. Work on one provider key is
/// serialized through a keyed lock shared by every run of this runner, and
/// the final write is version-checked, so a concurrent writer shows up as a
/// per-record conflict instead of a lost update.
///
/// Enrichment of GTID-matched products runs after the pool drains, in
/// payload order, and only for records whose row was written.
pub struct ImportRunner {
    pipeline: Arc<Pipeline>,
    settings: ImportSettings,
}

struct Pipeline {
    products: Arc<dyn ProductRepository>,
    provider_products: Arc<dyn DataProviderProductRepository>,
    normalizer: Normalizer,
    resolver: AssociationResolver,
    enrich_keys: HashSet<String>,
    key_locks: KeyedLocks<ProviderKey>,
    product_locks: KeyedLocks<ProductId>,
}

impl ImportRunner {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        provider_products: Arc<dyn DataProviderProductRepository>,
        settings: ImportSettings,
    ) -> Self {
        let pipeline = Pipeline {
            products,
            provider_products,
            normalizer: Normalizer::new(settings.provider_id.clone()),
            resolver: AssociationResolver::new(settings.attribute_threshold),
            enrich_keys: settings.enrich_attributes.iter().map(|name| canonical_name(name)).collect(),
            key_locks: KeyedLocks::new(),
            product_locks: KeyedLocks::new(),
        };
        Self { pipeline: Arc::new(pipeline), settings }
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    pub async fn run_source(&self, source: &dyn ImportSource) -> Result<ImportResult, RunError> {
        info!(
            event_name = "import.source.fetch",
            source = %source.describe(),
            "reading import payload"
        );
        let payload = source.fetch().await.map_err(|err| {
            error!(
                event_name = "import.run.failed",
                source = %source.describe(),
                error = %err,
                "import source unavailable"
            );
            RunError::from(err)
        })?;
        self.run(&payload).await
    }

    pub async fn run(&self, payload: &[u8]) -> Result<ImportResult, RunError> {
        let run_id = Uuid::new_v4().to_string();
        let start_time = Utc::now();
        info!(
            event_name = "import.run.started",
            correlation_id = %run_id,
            provider_id = %self.settings.provider_id,
            workers = self.settings.workers,
            payload_bytes = payload.len(),
            "import run started"
        );

        let outcome =
            tokio::time::timeout(self.settings.timeout, self.execute(&run_id, payload, start_time))
                .await
                .unwrap_or(Err(RunError::Timeout(self.settings.timeout)));

        match &outcome {
            Ok(result) => info!(
                event_name = "import.run.completed",
                correlation_id = %run_id,
                total = result.total_products(),
                associated = result.associated_products(),
                not_associated = result.not_associated_products(),
                errors = result.errors().len(),
                "import run completed"
            ),
            Err(err) => error!(
                event_name = "import.run.failed",
                correlation_id = %run_id,
                error = %err,
                "import run failed"
            ),
        }
        outcome
    }

    async fn execute(
        &self,
        run_id: &str,
        payload: &[u8],
        start_time: DateTime<Utc>,
    ) -> Result<ImportResult, RunError> {
        let records = parse_payload(payload)?;
        let catalog = self.pipeline.products.list().await.map_err(RunError::Storage)?;
        let snapshot =
            Arc::new(CatalogSnapshot::ignoring(catalog, self.pipeline.enrich_keys.iter()));

        let permits = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = JoinSet::new();
        let total = records.len();

        for (index, raw) in records.into_iter().enumerate() {
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|err| RunError::WorkerPool(err.to_string()))?;
            let pipeline = Arc::clone(&self.pipeline);
            let snapshot = Arc::clone(&snapshot);
            let run_id = run_id.to_string();
            tasks.spawn(async move {
                let _permit = permit;
                (index, pipeline.process(&run_id, index, &raw, &snapshot).await)
            });
        }

        // Collected by index so errors come out in payload order whatever the scheduling.
        let mut outcomes: Vec<Option<RecordOutcome>> = vec![None; total];
        let mut enrichments: Vec<Option<Enrichment>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, processed) = joined.map_err(|err| RunError::WorkerPool(err.to_string()))?;
            let (outcome, enrichment) = processed?;
            outcomes[index] = Some(outcome);
            enrichments[index] = enrichment;
        }
        self.pipeline.enrich_all(run_id, enrichments, &mut outcomes).await?;

        let mut tally = ImportTally::start(run_id, self.settings.provider_id.clone(), start_time);
        for outcome in outcomes.into_iter().flatten() {
            tally.record(outcome);
        }
        Ok(tally.finish(Utc::now()))
    }
}

fn parse_payload(payload: &[u8]) -> Result<Vec<Value>, RunError> {
    match serde_json::from_slice::<Value>(payload).map_err(RunError::Payload)? {
        Value::Array(records) => Ok(records),
        _ => Err(RunError::PayloadShape),
    }
}

/// Attributes a GTID-matched record copies onto its product.
struct Enrichment {
    key: ProviderKey,
    product_id: ProductId,
    attributes: Vec<DataProviderAttribute>,
}

fn conflict_message(error: &RepositoryError) -> String {
    match error {
        RepositoryError::Conflict(message) | RepositoryError::NotFound(message) => message.clone(),
        other => other.to_string(),
    }
}

impl Pipeline {
    async fn process(
        &self,
        run_id: &str,
        index: usize,
        raw: &Value,
        snapshot: &CatalogSnapshot,
    ) -> Result<(RecordOutcome, Option<Enrichment>), RunError> {
        let record = match self.normalizer.normalize(raw) {
            Ok(record) => record,
            Err(err) => return Ok((self.fail(run_id, RecordError::new(index, None, err)), None)),
        };
        let key = record.key();
        let _key_guard = self.key_locks.lock(key.clone()).await;

        let (association, ambiguity) = match self.resolver.resolve(&record, snapshot) {
            Ok(association) => (association, None),
            Err(ambiguous) => (AssociationOutcome::Unassociated, Some(ambiguous)),
        };

        if let Err(err) = self.write_row(&record, &association).await {
            if err.is_unavailable() {
                return Err(RunError::Storage(err));
            }
            let kind = RecordErrorKind::StorageConflict(conflict_message(&err));
            return Ok((self.fail(run_id, RecordError::new(index, Some(key), kind)), None));
        }

        if let Some(ambiguous) = ambiguity {
            return Ok((self.fail(run_id, RecordError::new(index, Some(key), ambiguous)), None));
        }

        Ok(match association {
            AssociationOutcome::Associated { product_id, strategy } => {
                let enrichment = (strategy == AssociationStrategy::GtidExact)
                    .then(|| self.enrichment_for(key, product_id, &record))
                    .flatten();
                (RecordOutcome::Associated, enrichment)
            }
            AssociationOutcome::Unassociated => (RecordOutcome::Unassociated, None),
        })
    }

    /// Only the first occurrence of each configured name in the record is used.
    fn enrichment_for(
        &self,
        key: ProviderKey,
        product_id: ProductId,
        record: &NormalizedRecord,
    ) -> Option<Enrichment> {
        let mut seen = HashSet::new();
        let attributes: Vec<_> = record
            .attributes
            .iter()
            .filter(|attribute| {
                let name = attribute.key();
                self.enrich_keys.contains(&name) && seen.insert(name)
            })
            .cloned()
            .collect();
        (!attributes.is_empty()).then_some(Enrichment { key, product_id, attributes })
    }

    /// Applies pending enrichments in payload order. Within a run the lowest
    /// record index to supply a name for a product decides its value.
    async fn enrich_all(
        &self,
        run_id: &str,
        pending: Vec<Option<Enrichment>>,
        outcomes: &mut [Option<RecordOutcome>],
    ) -> Result<(), RunError> {
        let mut claimed: HashSet<(ProductId, String)> = HashSet::new();
        for (index, enrichment) in pending.into_iter().enumerate() {
            let Some(Enrichment { key, product_id, attributes }) = enrichment else {
                continue;
            };
            let updates: Vec<_> = attributes
                .into_iter()
                .filter(|attribute| claimed.insert((product_id.clone(), attribute.key())))
                .collect();
            if updates.is_empty() {
                continue;
            }

            if let Err(err) = self.enrich(&product_id, &updates).await {
                if err.is_unavailable() {
                    return Err(RunError::Storage(err));
                }
                let kind = RecordErrorKind::StorageConflict(conflict_message(&err));
                outcomes[index] = Some(self.fail(run_id, RecordError::new(index, Some(key), kind)));
            }
        }
        Ok(())
    }

    fn fail(&self, run_id: &str, error: RecordError) -> RecordOutcome {
        warn!(
            event_name = "import.record.failed",
            correlation_id = %run_id,
            record_index = error.index,
            error = %error,
            "import record failed"
        );
        RecordOutcome::Failed(error)
    }

    async fn write_row(
        &self,
        record: &NormalizedRecord,
        association: &AssociationOutcome,
    ) -> Result<(), RepositoryError> {
        let key = record.key();
        let existing = self.provider_products.find_by_key(&key).await?;
        let now = Utc::now();

        let row = DataProviderProduct {
            data_provider_id: key.data_provider_id,
            external_id: key.external_id,
            global_trade_identifier: record.gtid.clone(),
            imported_at: existing.as_ref().map_or(now, |stored| stored.imported_at),
            last_updated_at: now,
            association_strategy: association.strategy(),
            associated_product_id: association.product_id().cloned(),
            attributes: record.attributes.clone(),
            version: 0,
        };
        self.provider_products.upsert(row, existing.map(|stored| stored.version)).await?;
        Ok(())
    }

    /// Nothing is written when the product already carries every value.
    async fn enrich(
        &self,
        product_id: &ProductId,
        updates: &[DataProviderAttribute],
    ) -> Result<(), RepositoryError> {
        let _product_guard = self.product_locks.lock(product_id.clone()).await;
        let Some(mut product) = self.products.find_by_id(product_id).await? else {
            return Err(RepositoryError::Conflict(format!(
                "product `{product_id}` was deleted during the import"
            )));
        };

        let mut changed = false;
        for attribute in updates {
            changed |= product.set_attribute(&attribute.name, &attribute.value);
        }
        if changed {
            self.products.save(product).await?;
        }
        Ok(())
    }
}
