use anyhow::{Context, Result};
use colored::Colorize;
use walcap_pg::{PgReplicator, PostgresOpts, ReplicationSlotState};

fn format_lsn(lsn: Option<walcap_core::Lsn>) -> String {
    lsn.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string())
}

pub async fn cmd_check(opts: PostgresOpts) -> Result<()> {
    let mut replicator = PgReplicator::new(opts)
        .await
        .context("Failed to connect to Postgres")?;

    let slot = match replicator.replication_slot().await {
        Ok(slot) => slot,
        Err(e) => {
            replicator.close().await.ok();
            if e.is_configuration() {
                eprintln!("{}", e.to_string().red());
                eprintln!("Run `walcap setup` to create the publication and slot.");
            }
            return Err(e.into());
        }
    };

    print_slot(replicator.slot_name(), &slot);
    println!("  tables:        {}", replicator.catalog().len());
    println!(
        "  server:        {}",
        replicator.catalog().server_version()
    );
    println!();
    println!("{}", "Ready to replicate.".green());

    replicator.close().await?;
    Ok(())
}

fn print_slot(name: &str, slot: &ReplicationSlotState) {
    println!("\nReplication slot {}:", name.bold());
    println!(
        "  active:        {}",
        if slot.active { "yes".yellow() } else { "no".normal() }
    );
    println!("  restart_lsn:   {}", format_lsn(slot.restart_lsn));
    println!("  confirmed_lsn: {}", format_lsn(slot.confirmed_flush_lsn));
}
