use catalink_db::{DemoCatalog, SqlProductRepository, VerificationResult};

use crate::commands::{finish, open_catalog, prepare, CommandResult, Failure};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_catalog(&config).await?;
        let repo = SqlProductRepository::new(pool.clone());

        let seeded = DemoCatalog::load(&repo)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8));
        let verified = match seeded {
            Ok(seeded) => DemoCatalog::verify(&repo)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), 6u8))
                .and_then(|verification| {
                    check_verification(&verification).map(|()| seeded.product_ids)
                }),
            Err(failure) => Err(failure),
        };

        pool.close().await;
        let product_ids = verified?;
        Ok::<_, Failure>(CommandResult::success(
            "seed",
            format!("demo catalog loaded: {}", product_ids.join(", ")),
        ))
    });

    finish("seed", result)
}

fn check_verification(verification: &VerificationResult) -> Result<(), Failure> {
    if verification.is_complete() {
        return Ok(());
    }
    Err((
        "seed_verification",
        format!("demo products missing after seeding: {}", verification.missing.join(", ")),
        6u8,
    ))
}
