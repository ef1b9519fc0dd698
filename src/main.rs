//! hubwatch daemon entry point.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::signal;
use tokio::sync::mpsc;

use hubwatch::config::{Config, ListerKind};
use hubwatch::hub::{HubClient, InventoryCache, RemoteSession};
use hubwatch::runtime::docker::{parse_containers, parse_images};
use hubwatch::runtime::{CliLister, EngineLister, ResourceKind, ResourceLister, ShellRunner};
use hubwatch::{ChangeSignal, PollingRefresher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!(
        "Starting hubwatch (registry {}, lister {:?}, auto refresh {}ms)",
        cfg.repo_base, cfg.lister, cfg.auto_refresh_interval_ms
    );

    let changes = Arc::new(ChangeSignal::new());

    // Registry session and inventory
    let client = HubClient::new(&cfg.auth_base, &cfg.repo_base, cfg.request_timeout())?;
    let session = Arc::new(RemoteSession::new(Arc::new(client), Arc::clone(&changes)));
    let inventory = Arc::new(InventoryCache::new(Arc::clone(&session)));

    match cfg.credentials() {
        Some((user, password)) => match session.login(user, password).await {
            Ok(()) => match inventory.refresh().await {
                Ok(report) if !report.is_complete() => warn!(
                    "No tags for {} repositories: {}",
                    report.tags_failed.len(),
                    report.tags_failed.join(", ")
                ),
                Ok(_) => {}
                Err(e) => error!("Registry refresh failed: {}", e),
            },
            Err(e) => error!("Registry login failed: {}", e),
        },
        None => info!("No registry credentials configured, skipping login"),
    }

    // Local listings
    let lister: Arc<dyn ResourceLister> = match cfg.lister {
        ListerKind::Cli => Arc::new(CliLister::new(Arc::new(ShellRunner), cfg.docker_bin.clone())),
        ListerKind::Engine => Arc::new(EngineLister::connect()?),
    };
    let refreshers: Arc<Vec<PollingRefresher>> = Arc::new(
        ResourceKind::ALL
            .iter()
            .map(|kind| PollingRefresher::new(*kind, Arc::clone(&lister), Arc::clone(&changes)))
            .collect(),
    );
    // First samples become the baselines.
    for refresher in refreshers.iter() {
        if let Err(e) = refresher.poll_now().await {
            warn!("Initial listing of {} failed: {}", refresher.kind(), e);
        }
    }

    // Change reporter
    let (change_tx, mut change_rx) = mpsc::channel::<()>(1);
    changes.subscribe(move || {
        // A pending wakeup already covers this change.
        let _ = change_tx.try_send(());
    });
    let reporter_inventory = Arc::clone(&inventory);
    let reporter_refreshers = Arc::clone(&refreshers);
    let reporter_handle = tokio::spawn(async move {
        while change_rx.recv().await.is_some() {
            report(&reporter_inventory, &reporter_refreshers);
        }
    });
    report(&inventory, &refreshers);

    for refresher in refreshers.iter() {
        refresher.set_interval(cfg.auto_refresh_interval_ms);
    }

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    for refresher in refreshers.iter() {
        refresher.cancel();
    }
    session.logout();
    reporter_handle.abort();

    info!("Shutdown complete.");
    Ok(())
}

fn report(inventory: &InventoryCache, refreshers: &[PollingRefresher]) {
    let repositories = inventory.list_repositories();
    let tags: usize = repositories
        .iter()
        .map(|repo| inventory.list_tags(&repo.name).len())
        .sum();
    match inventory.session().current_user() {
        Some(user) => info!(
            "Registry {}: {} repositories, {} tags",
            user,
            repositories.len(),
            tags
        ),
        None => info!("Registry: logged out"),
    }

    for refresher in refreshers {
        let snapshot = refresher.snapshot();
        match refresher.kind() {
            ResourceKind::Containers => {
                let containers = parse_containers(snapshot.lines());
                let running = containers.iter().filter(|c| c.running).count();
                info!("Containers: {} ({} running)", containers.len(), running);
                for container in &containers {
                    debug!("  {} [{}]", container.label(), container.status);
                }
            }
            ResourceKind::Images => {
                let images = parse_images(snapshot.lines());
                info!("Images: {}", images.len());
                for image in &images {
                    debug!("  {}", image.reference());
                }
            }
        }
    }
}
