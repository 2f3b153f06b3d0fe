use anyhow::Context;
use redis_shard::cli::{format_reply, CliArgs};
use redis_shard::{Arg, RedisConfig, ShardRouter};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = CliArgs::parse(std::env::args())?;
    let config = RedisConfig::from_path(&cli.config_path)
        .with_context(|| format!("loading config from {}", cli.config_path.display()))?;

    let mut router = ShardRouter::new(config);
    if let Some(temp_hash) = cli.temp_hash {
        router.set_temp_hash(temp_hash);
    }

    let args = cli.args.into_iter().map(Arg::from).collect();
    let reply = router
        .dispatch(&cli.verb, args)
        .await
        .with_context(|| format!("{} failed", cli.verb))?;

    println!("{}", format_reply(&reply));
    Ok(())
}
