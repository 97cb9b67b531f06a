//! The offline cache controller.
//!
//! Owns the versioned shell store for the running application version:
//! pre-populates it at install time (all-or-nothing), purges stale version
//! stores on activation, serves intercepted requests network-first, and
//! broadcasts update signals to every subscribed page context.
//!
//! The controller runs in its own task and talks to page contexts only
//! through channels; pages hold a [`ControllerHandle`].

pub mod lifecycle;

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use crate::cache::{CacheLayer, CacheStore, RequestKey, ResponseSnapshot, Served};
use crate::fetch::{FetchRequest, Fetcher};
use crate::message::ClientMessage;
use lifecycle::{transition, WorkerState};

/// Capacity of the update broadcast channel. Signals are tiny and listeners
/// poll frequently, so a small buffer is enough.
const UPDATE_CHANNEL_CAPACITY: usize = 16;

/// Derive the store name for an application version.
pub fn store_name_for(version: &str) -> String {
  format!("shell-{}", version)
}

/// The offline cache controller for one application version.
pub struct OfflineController<S: CacheStore> {
  version: String,
  state: WorkerState,
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  layer: CacheLayer<S>,
  /// Ordered shell manifest. Every path must fetch with HTTP 200 at install
  /// time; the first path is the entry document whose hash drives update
  /// checks.
  precache: Vec<String>,
  updates: broadcast::Sender<ClientMessage>,
}

impl<S: CacheStore + 'static> OfflineController<S> {
  pub fn new(
    version: impl Into<String>,
    precache: Vec<String>,
    storage: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
  ) -> Self {
    let version = version.into();
    let store_name = store_name_for(&version);
    let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

    Self {
      version,
      state: WorkerState::New,
      layer: CacheLayer::new(Arc::clone(&storage), store_name),
      storage,
      fetcher,
      precache,
      updates,
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn store_name(&self) -> &str {
    self.layer.store_name()
  }

  /// Subscribe to controller messages. Each open page context holds one
  /// receiver; messages to dropped receivers are discarded by the channel.
  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    self.updates.subscribe()
  }

  /// Install: pre-populate the shell store from the manifest.
  ///
  /// All-or-nothing: any unreachable or non-200 resource fails the install,
  /// nothing is committed, and the controller becomes redundant. The browser
  /// analogue retries on the next load by constructing a fresh controller.
  pub async fn install(&mut self) -> Result<()> {
    self.state = transition(self.state, WorkerState::Installing)?;
    info!(version = %self.version, "installing shell cache");

    match self.populate_shell().await {
      Ok(()) => {
        self.state = transition(self.state, WorkerState::Installed)?;
        Ok(())
      }
      Err(e) => {
        self.state = transition(self.state, WorkerState::Redundant)?;
        Err(e)
      }
    }
  }

  async fn populate_shell(&self) -> Result<()> {
    let fetches = self.precache.iter().map(|path| {
      let fetcher = Arc::clone(&self.fetcher);
      async move {
        let request = FetchRequest::get(path.clone());
        let response = fetcher.fetch(&request).await?;
        if !response.is_cacheable() {
          return Err(eyre!(
            "Shell resource {} returned HTTP {}",
            path,
            response.status
          ));
        }
        Ok((RequestKey::from(&request), ResponseSnapshot::from(&response)))
      }
    });

    let entries: Vec<(RequestKey, ResponseSnapshot)> =
      futures::future::try_join_all(fetches).await?;

    // Hash of the entry document (first manifest resource), compared on
    // later update checks.
    let shell_hash = entries
      .first()
      .map(|(_, snapshot)| hex::encode(Sha256::digest(&snapshot.body)))
      .ok_or_else(|| eyre!("Shell manifest is empty"))?;

    let store = self.store_name().to_string();
    self.storage.put_all(&store, &entries)?;
    self.storage.set_shell_hash(&store, &shell_hash)?;

    info!(store = %store, entries = entries.len(), "shell cache populated");
    Ok(())
  }

  /// Activate: purge every store from another version, take control, and
  /// signal all subscribed pages exactly once.
  pub async fn activate(&mut self) -> Result<()> {
    self.state = transition(self.state, WorkerState::Activating)?;

    let current = self.store_name().to_string();
    for name in self.storage.list_stores()? {
      if name != current {
        info!(store = %name, "purging stale shell cache");
        self.storage.delete_store(&name)?;
      }
    }

    // Claiming pages and notifying them collapse into one broadcast here:
    // every subscriber is now controlled by this version. No receivers is
    // fine; there may be no open pages.
    let _ = self.updates.send(ClientMessage::UpdateAvailable {
      version: self.version.clone(),
    });

    self.state = transition(self.state, WorkerState::Active)?;
    info!(version = %self.version, "controller active");
    Ok(())
  }

  /// Run the full install + activate cycle. This controller always skips
  /// waiting, so the installed state is transit-only.
  pub async fn start(&mut self) -> Result<()> {
    self.install().await?;
    self.activate().await
  }

  /// Serve one intercepted request network-first. Active controllers only.
  pub async fn handle_request(&self, request: &FetchRequest) -> Result<Served> {
    if !self.state.can_intercept_fetch() {
      return Err(eyre!(
        "Controller is {} and cannot intercept fetches",
        self.state
      ));
    }

    let key = RequestKey::from(request);
    let fetcher = Arc::clone(&self.fetcher);
    let request = request.clone();
    self
      .layer
      .serve(&key, || async move { fetcher.fetch(&request).await })
      .await
  }

  /// Re-fetch the entry document and compare its hash with the one recorded
  /// at install time. On mismatch, broadcast an update signal carrying the
  /// new content hash (the deployed version string is not knowable until the
  /// new shell is loaded) and return true.
  pub async fn check_for_update(&self) -> Result<bool> {
    let entry_path = self
      .precache
      .first()
      .ok_or_else(|| eyre!("Shell manifest is empty"))?;

    let response = self.fetcher.fetch(&FetchRequest::get(entry_path.clone())).await?;
    if !response.is_cacheable() {
      return Err(eyre!(
        "Update check for {} returned HTTP {}",
        entry_path,
        response.status
      ));
    }

    let fresh_hash = hex::encode(Sha256::digest(&response.body));
    let recorded = self.storage.shell_hash(self.store_name())?;

    match recorded {
      Some(recorded) if recorded != fresh_hash => {
        info!(version = %self.version, "newer shell content detected");
        let _ = self.updates.send(ClientMessage::UpdateAvailable {
          version: fresh_hash,
        });
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  /// Start the controller and run it on its own task, returning a cloneable
  /// handle for page contexts.
  pub async fn spawn(mut self) -> Result<ControllerHandle> {
    self.start().await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ControllerHandle {
      version: self.version.clone(),
      commands: tx,
      updates: self.updates.clone(),
    };

    tokio::spawn(self.run(rx));
    Ok(handle)
  }

  async fn run(self, mut commands: mpsc::UnboundedReceiver<WorkerCommand>) {
    while let Some(command) = commands.recv().await {
      match command {
        WorkerCommand::Fetch { request, reply } => {
          // Each intercepted fetch is independent; serve it on its own task
          let layer = self.layer.clone();
          let fetcher = Arc::clone(&self.fetcher);
          tokio::spawn(async move {
            let key = RequestKey::from(&request);
            let result = layer
              .serve(&key, || async move { fetcher.fetch(&request).await })
              .await;
            // Page may have navigated away; a dropped reply is fine
            let _ = reply.send(result);
          });
        }
        WorkerCommand::CheckForUpdates => {
          if let Err(e) = self.check_for_update().await {
            warn!("update check failed: {}", e);
          }
        }
      }
    }
  }
}

/// Commands sent from page contexts to the running controller.
enum WorkerCommand {
  Fetch {
    request: FetchRequest,
    reply: oneshot::Sender<Result<Served>>,
  },
  CheckForUpdates,
}

/// A page context's handle to the running controller.
#[derive(Clone)]
pub struct ControllerHandle {
  version: String,
  commands: mpsc::UnboundedSender<WorkerCommand>,
  updates: broadcast::Sender<ClientMessage>,
}

impl ControllerHandle {
  /// Version of the controlling worker.
  pub fn version(&self) -> &str {
    &self.version
  }

  /// Subscribe to controller messages for the lifetime of a page.
  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    self.updates.subscribe()
  }

  /// Serve one request through the controller.
  pub async fn fetch(&self, request: FetchRequest) -> Result<Served> {
    let (reply, rx) = oneshot::channel();
    self
      .commands
      .send(WorkerCommand::Fetch { request, reply })
      .map_err(|_| eyre!("Controller has shut down"))?;

    rx.await.map_err(|_| eyre!("Controller dropped the request"))?
  }

  /// Ask the controller to check for a newer shell. Fire-and-forget; a
  /// resulting update arrives as a broadcast message.
  pub fn request_update_check(&self) {
    let _ = self.commands.send(WorkerCommand::CheckForUpdates);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryCacheStore, ServeSource};
  use crate::fetch::testing::FakeFetcher;
  use crate::fetch::Method;
  use std::time::Duration;
  use tokio::sync::broadcast::error::TryRecvError;

  const SHELL: [&str; 4] = ["/", "/index.html", "/manifest.json", "/favicon.png"];

  fn shell_fetcher() -> Arc<FakeFetcher> {
    let fetcher = FakeFetcher::new();
    fetcher.respond("/", 200, b"<!doctype html>root");
    fetcher.respond("/index.html", 200, b"<!doctype html>entry");
    fetcher.respond("/manifest.json", 200, b"{\"name\":\"Tatame\"}");
    fetcher.respond("/favicon.png", 200, b"\x89PNG");
    Arc::new(fetcher)
  }

  fn controller(
    version: &str,
    storage: Arc<MemoryCacheStore>,
    fetcher: Arc<FakeFetcher>,
  ) -> OfflineController<MemoryCacheStore> {
    OfflineController::new(
      version,
      SHELL.iter().map(|s| s.to_string()).collect(),
      storage,
      fetcher,
    )
  }

  #[tokio::test]
  async fn test_install_populates_all_manifest_entries() {
    let storage = Arc::new(MemoryCacheStore::new());
    let mut ctrl = controller("1.0.0", Arc::clone(&storage), shell_fetcher());

    ctrl.start().await.unwrap();

    assert_eq!(ctrl.state(), WorkerState::Active);
    assert_eq!(ctrl.store_name(), "shell-1.0.0");
    assert_eq!(storage.entry_count("shell-1.0.0").unwrap(), 4);
  }

  #[tokio::test]
  async fn test_failed_install_commits_nothing() {
    let fetcher = shell_fetcher();
    fetcher.fail_path("/favicon.png");
    let storage = Arc::new(MemoryCacheStore::new());
    let mut ctrl = controller("1.0.0", Arc::clone(&storage), fetcher);

    assert!(ctrl.install().await.is_err());

    assert_eq!(ctrl.state(), WorkerState::Redundant);
    assert_eq!(storage.entry_count("shell-1.0.0").unwrap(), 0);
    assert!(storage.list_stores().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_non_200_shell_resource_fails_install() {
    let fetcher = shell_fetcher();
    fetcher.respond("/manifest.json", 404, b"not found");
    let storage = Arc::new(MemoryCacheStore::new());
    let mut ctrl = controller("1.0.0", Arc::clone(&storage), fetcher);

    assert!(ctrl.install().await.is_err());
    assert_eq!(storage.entry_count("shell-1.0.0").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_activation_purges_other_version_stores() {
    let storage = Arc::new(MemoryCacheStore::new());
    storage
      .put(
        "shell-0.9.0",
        &RequestKey::new(Method::Get, "/"),
        &ResponseSnapshot {
          status: 200,
          headers: vec![],
          body: b"old".to_vec(),
        },
      )
      .unwrap();

    let mut ctrl = controller("1.0.0", Arc::clone(&storage), shell_fetcher());
    ctrl.start().await.unwrap();

    assert_eq!(storage.list_stores().unwrap(), vec!["shell-1.0.0".to_string()]);
  }

  #[tokio::test]
  async fn test_activation_signals_every_subscriber_exactly_once() {
    let storage = Arc::new(MemoryCacheStore::new());
    let mut ctrl = controller("2.0.0", storage, shell_fetcher());

    let mut page_a = ctrl.subscribe();
    let mut page_b = ctrl.subscribe();

    ctrl.start().await.unwrap();

    for page in [&mut page_a, &mut page_b] {
      let msg = page.try_recv().unwrap();
      assert_eq!(
        msg,
        ClientMessage::UpdateAvailable {
          version: "2.0.0".to_string()
        }
      );
      assert!(matches!(page.try_recv(), Err(TryRecvError::Empty)));
    }
  }

  #[tokio::test]
  async fn test_fetch_rejected_before_activation() {
    let storage = Arc::new(MemoryCacheStore::new());
    let ctrl = controller("1.0.0", storage, shell_fetcher());

    let result = ctrl.handle_request(&FetchRequest::get("/trainings")).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_precached_shell_served_offline_byte_for_byte() {
    let fetcher = shell_fetcher();
    let storage = Arc::new(MemoryCacheStore::new());
    let mut ctrl = controller("1.0.0", storage, Arc::clone(&fetcher));
    ctrl.start().await.unwrap();

    fetcher.set_offline(true);

    let served = ctrl
      .handle_request(&FetchRequest::get("/index.html"))
      .await
      .unwrap();
    assert_eq!(served.source, ServeSource::Cache);
    assert_eq!(served.response.status, 200);
    assert_eq!(served.response.body, b"<!doctype html>entry");
  }

  #[tokio::test]
  async fn test_runtime_fetch_cached_then_served_offline() {
    let fetcher = shell_fetcher();
    fetcher.respond("/trainings", 200, b"[{\"technique\":\"armbar\"}]");
    let storage = Arc::new(MemoryCacheStore::new());
    let mut ctrl = controller("1.0.0", storage, Arc::clone(&fetcher));
    ctrl.start().await.unwrap();

    let live = ctrl
      .handle_request(&FetchRequest::get("/trainings"))
      .await
      .unwrap();
    assert_eq!(live.source, ServeSource::Network);

    // Cache write is fire-and-forget
    tokio::time::sleep(Duration::from_millis(10)).await;
    fetcher.set_offline(true);

    let offline = ctrl
      .handle_request(&FetchRequest::get("/trainings"))
      .await
      .unwrap();
    assert_eq!(offline.source, ServeSource::Cache);
    assert_eq!(offline.response.body, live.response.body);
  }

  #[tokio::test]
  async fn test_offline_miss_propagates_error() {
    let fetcher = shell_fetcher();
    let storage = Arc::new(MemoryCacheStore::new());
    let mut ctrl = controller("1.0.0", storage, Arc::clone(&fetcher));
    ctrl.start().await.unwrap();

    fetcher.set_offline(true);

    let result = ctrl
      .handle_request(&FetchRequest::get("/never-fetched"))
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_update_check_detects_changed_shell() {
    let fetcher = shell_fetcher();
    let storage = Arc::new(MemoryCacheStore::new());
    let mut ctrl = controller("1.0.0", storage, Arc::clone(&fetcher));
    ctrl.start().await.unwrap();

    let mut page = ctrl.subscribe();

    assert!(!ctrl.check_for_update().await.unwrap());
    assert!(matches!(page.try_recv(), Err(TryRecvError::Empty)));

    fetcher.respond("/", 200, b"<!doctype html>redesigned");
    assert!(ctrl.check_for_update().await.unwrap());

    let msg = page.try_recv().unwrap();
    assert!(msg.update_version().is_some());
  }

  #[tokio::test]
  async fn test_spawned_handle_serves_fetches() {
    let fetcher = shell_fetcher();
    fetcher.respond("/competitions", 200, b"[]");
    let storage = Arc::new(MemoryCacheStore::new());
    let ctrl = controller("1.0.0", storage, fetcher);

    let handle = ctrl.spawn().await.unwrap();
    assert_eq!(handle.version(), "1.0.0");

    let served = handle.fetch(FetchRequest::get("/competitions")).await.unwrap();
    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.body, b"[]");
  }

  #[tokio::test]
  async fn test_handle_update_check_broadcasts() {
    let fetcher = shell_fetcher();
    let storage = Arc::new(MemoryCacheStore::new());
    let ctrl = controller("1.0.0", storage, Arc::clone(&fetcher));

    let handle = ctrl.spawn().await.unwrap();
    let mut page = handle.subscribe();

    fetcher.respond("/", 200, b"something new");
    handle.request_update_check();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let msg = page.try_recv().unwrap();
    assert!(msg.update_version().is_some());
  }
}
