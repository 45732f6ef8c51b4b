use std::sync::Arc;

use clap::Parser;
use roster_sync::{
    BackupRotation, Cli, Coordinator, LocalFile, PersistenceKind, RemoteMirror, SnapshotStore,
    SyncServer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    log::info!("roster-sync v{}", env!("CARGO_PKG_VERSION"));

    let server_config = cli.server_config()?;
    let schema = cli.schema()?;
    log::info!(
        "Groups: {} (auto-compact {})",
        schema.groups.join(", "),
        if schema.auto_compact { "on" } else { "off" }
    );

    let persistence: Arc<dyn SnapshotStore> = match cli.persistence {
        PersistenceKind::Local => {
            let rotation = BackupRotation::new(cli.backup_config())?;
            log::info!(
                "Backups every {}s into {}, keeping {}",
                rotation.config().interval.as_secs(),
                rotation.config().dir.display(),
                rotation.config().keep
            );
            rotation.spawn();
            Arc::new(LocalFile::new(&cli.data_file))
        }
        PersistenceKind::Remote => Arc::new(RemoteMirror::new(cli.remote_config()?)?),
    };

    let coordinator =
        Coordinator::bootstrap(schema, persistence, server_config.broadcast_capacity).await?;

    SyncServer::new(server_config, coordinator).run().await?;
    Ok(())
}
