use anyhow::Context;
use dotenv::dotenv;
use env_logger::Env;
use resume_tweaker::app::router;
use resume_tweaker::config::Config;
use resume_tweaker::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = Config::from_env().context("invalid configuration")?;
    let addr = config.site_addr;

    match &config.anthropic {
        Some(anthropic) => log::info!("Streaming from Anthropic model {}", anthropic.model),
        None => log::warn!("ANTHROPIC_API_KEY not set, serving demo streams"),
    }

    let app = router(AppState::new(config));

    log::info!("Starting server at {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("listening on http://{}", &addr);
    axum::serve(listener, app).await?;

    Ok(())
}
