use std::path::PathBuf;
use std::sync::Arc;

use catalink_db::{SqlDataProviderProductRepository, SqlProductRepository};
use catalink_importer::{ImportRunner, ImportSettings, JsonFileSource, RunError};

use crate::commands::{finish, open_catalog, prepare, CommandResult, Failure};

pub fn run(file: Option<PathBuf>) -> CommandResult {
    let (config, runtime) = match prepare("import") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let path = file.unwrap_or_else(|| config.import.source_path.clone());

    let result = runtime.block_on(async {
        let pool = open_catalog(&config).await?;
        let runner = ImportRunner::new(
            Arc::new(SqlProductRepository::new(pool.clone())),
            Arc::new(SqlDataProviderProductRepository::new(pool.clone())),
            ImportSettings::from_config(&config),
        );

        let outcome = runner.run_source(&JsonFileSource::new(&path)).await;
        pool.close().await;
        let result = outcome.map_err(run_failure)?;

        let details = serde_json::to_value(&result).ok();
        Ok::<_, Failure>(CommandResult::success_with_details(
            "import",
            format!("imported `{}`: {result}", path.display()),
            details,
        ))
    });

    finish("import", result)
}

fn run_failure(error: RunError) -> Failure {
    let (error_class, exit_code) = match &error {
        RunError::Payload(_) | RunError::PayloadShape => ("import_payload", 7),
        RunError::SourceUnavailable(_) => ("import_source", 8),
        RunError::Timeout(_) => ("import_timeout", 9),
        RunError::Storage(_) => ("db_connectivity", 4),
        RunError::WorkerPool(_) => ("import_worker", 10),
    };
    (error_class, error.to_string(), exit_code)
}
