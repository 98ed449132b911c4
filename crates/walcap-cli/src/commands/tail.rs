use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walcap_core::Changeset;
use walcap_pg::{PgReplicator, PostgresOpts, ReplicatorHandle};

use crate::watermark_file::FileWatermarkStore;

const CHANNEL_CAPACITY: usize = 1024;

pub async fn cmd_tail(mut opts: PostgresOpts, watermark_path: PathBuf) -> Result<()> {
    let store = FileWatermarkStore::new(watermark_path);
    match store.load().await? {
        Some(wm) => info!(lsn = %wm.lsn, path = %store.path().display(), "Resuming from saved watermark"),
        None => info!(path = %store.path().display(), "No saved watermark, starting at the current WAL position"),
    }
    opts.watermark_loader = Some(store.loader());
    opts.watermark_saver = Some(store.saver());

    let mut replicator = PgReplicator::new(opts)
        .await
        .context("Failed to connect to Postgres")?;
    replicator
        .test_connection()
        .await
        .context("Database is not ready for replication")?;

    let handle = replicator.handle();
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            on_ctrl_c.cancel();
        }
    });

    let (pulled, written) = tokio::join!(replicator.pull(cancel.clone(), tx), write_changes(rx, handle));

    let written = match written {
        Ok(n) => n,
        Err(e) => {
            // The receiver is gone by now, so pull has already stopped.
            warn!(error = %e, "Stopped writing changes");
            return Err(e);
        }
    };
    info!(changes = written, "Replication stopped");
    pulled.context("Replication failed")
}

/// Print each changeset as a JSON line and acknowledge it once flushed.
async fn write_changes(mut rx: mpsc::Receiver<Changeset>, handle: ReplicatorHandle) -> Result<u64> {
    let mut written = 0;
    while let Some(cs) = rx.recv().await {
        let line = serde_json::to_string(&cs)?;
        {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", line)?;
            stdout.flush()?;
        }
        handle.commit(cs.watermark);
        written += 1;
    }
    Ok(written)
}
