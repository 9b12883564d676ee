//! Applies or inspects schema migrations.
//!
//! Usage: `migration [up|down|status|fresh]`, defaulting to `up`.

use migrations::{Migrator, MigratorTrait};
use salon_booking_api::{config, db};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());
    let pool = db::establish_connection_from_app_config(&cfg).await?;

    let result = match command.as_str() {
        "up" => Migrator::up(&pool, None).await,
        "down" => Migrator::down(&pool, Some(1)).await,
        "status" => Migrator::status(&pool).await,
        "fresh" => {
            if cfg.is_production() {
                anyhow::bail!("refusing to drop every table in production");
            }
            Migrator::fresh(&pool).await
        }
        other => anyhow::bail!("unknown command `{}`; expected up, down, status or fresh", other),
    };

    match result {
        Ok(()) => {
            info!(command, "migration command finished");
            Ok(())
        }
        Err(e) => {
            error!(command, error = %e, "migration command failed");
            Err(e.into())
        }
    }
}
