use anyhow::{Context, Result};
use walcap_pg::{PgReplicator, PostgresOpts};

pub async fn cmd_lsn(opts: PostgresOpts) -> Result<()> {
    let mut replicator = PgReplicator::new(opts)
        .await
        .context("Failed to connect to Postgres")?;

    let lsn = replicator.server_lsn().await;
    replicator.close().await.ok();

    println!("{}", lsn.context("IDENTIFY_SYSTEM failed")?);
    Ok(())
}
