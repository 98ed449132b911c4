use anyhow::{Context, Result};
use colored::Colorize;
use walcap_pg::replication::{ensure_publication, ensure_slot, parse_table, SlotSetup};
use walcap_pg::{connect_postgres, PUBLICATION_NAME, SLOT_NAME};

pub async fn cmd_setup(connection_string: &str, tables: &[String]) -> Result<()> {
    let client = connect_postgres(connection_string)
        .await
        .context("Failed to connect to Postgres")?;

    let wal_level: String = client.query_one("SHOW wal_level", &[]).await?.get(0);
    if wal_level != "logical" {
        eprintln!(
            "{}",
            format!("wal_level is '{}'; logical replication needs 'logical'.", wal_level).yellow()
        );
        eprintln!("Set wal_level = logical in postgresql.conf and restart the server.");
    }

    let tables: Vec<_> = tables.iter().map(|t| parse_table(t)).collect();
    let added = ensure_publication(&client, PUBLICATION_NAME, &tables)
        .await
        .with_context(|| format!("Failed to set up publication '{}'", PUBLICATION_NAME))?;

    if tables.is_empty() {
        println!("Publication {} covers all tables", PUBLICATION_NAME.bold());
    } else if added.is_empty() {
        println!("Publication {} is up to date", PUBLICATION_NAME.bold());
    } else {
        println!("Publication {}: added", PUBLICATION_NAME.bold());
        for table in &added {
            println!("  - {}", table);
        }
    }

    let setup = ensure_slot(&client, SLOT_NAME)
        .await
        .with_context(|| format!("Failed to set up replication slot '{}'", SLOT_NAME))?;

    match setup {
        SlotSetup::Existing => println!("Replication slot {} already exists", SLOT_NAME.bold()),
        SlotSetup::Created(lsn) => {
            println!("Created replication slot {} at {}", SLOT_NAME.bold(), lsn)
        }
        SlotSetup::Recreated(lsn) => println!(
            "{}",
            format!(
                "Recreated replication slot {} at {} (it used a different output plugin)",
                SLOT_NAME, lsn
            )
            .yellow()
        ),
    }

    println!("\n{}", "Setup complete.".green());
    println!("Next: walcap tail");
    Ok(())
}
