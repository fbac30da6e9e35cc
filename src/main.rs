mod modules;
mod utils;

use anyhow::Context;
use biblio_kernel::{InitCtx, ModuleRegistry};
use biblio_kernel::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().with_context(|| "failed to load settings")?;

    biblio_telemetry::init(&settings.telemetry);

    tracing::info!(
        env = ?settings.environment,
        loan_period_days = settings.lending.loan_period_days,
        "biblio bootstrap starting"
    );

    let mut registry = ModuleRegistry::new();
    modules::register_all(&mut registry, &settings);

    let ctx = InitCtx {
        settings: &settings,
    };
    registry.init_all(&ctx).await?;
    registry.start_all(&ctx).await?;

    biblio_http::start_server(&registry, &settings).await
}
