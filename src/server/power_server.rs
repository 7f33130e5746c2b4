use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::{
    sync::{Mutex, OwnedRwLockWriteGuard},
    task::JoinHandle,
};

use crate::{
    config::{DataConfig, ServerConfig},
    models::Privileges,
    server::{measure::ActiveMeasure, service::Service, transaction::Transaction},
    error::AppResult,
    services::{
        provider::Provider,
        recommender::{recommender_factory, RecommenderFactory},
    },
};

/// Lifecycle transitions announced to status listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Started,
    Paused,
    Resumed,
    Stopped,
    Exit,
}

pub trait StatusListener: Send + Sync {
    fn on_status(&self, status: ServerStatus);
}

impl<F> StatusListener for F
where
    F: Fn(ServerStatus) + Send + Sync,
{
    fn on_status(&self, status: ServerStatus) {
        self(status)
    }
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    /// Held for as long as the server is paused
    paused: Option<OwnedRwLockWriteGuard<()>>,
    timer: Option<JoinHandle<()>>,
    store: Option<Arc<Provider>>,
}

impl Lifecycle {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Administrative server owning the live [`Service`]
///
/// States are stopped and started, the latter either running or paused. A started server
/// retrains on a timer when `period_learn` is set; the new recommender is built off to the
/// side and only the swap into the live service waits for the write lock.
pub struct PowerServer {
    config: Mutex<Option<ServerConfig>>,
    lifecycle: Mutex<Lifecycle>,
    service: Arc<Service>,
    transaction: Transaction,
    factory: Mutex<Arc<dyn RecommenderFactory>>,
    measure: ActiveMeasure,
    listeners: Mutex<Vec<Arc<dyn StatusListener>>>,
}

impl PowerServer {
    pub fn new(config: ServerConfig, factory: Arc<dyn RecommenderFactory>) -> Self {
        let transaction = Transaction::new();
        Self {
            config: Mutex::new(Some(config)),
            lifecycle: Mutex::new(Lifecycle::default()),
            service: Arc::new(Service::new(transaction.clone())),
            transaction,
            factory: Mutex::new(factory),
            measure: ActiveMeasure::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Server running the algorithm named by `config.recommender`
    pub fn from_config(config: ServerConfig) -> AppResult<Self> {
        let factory = recommender_factory(&config.recommender)?;
        Ok(Self::new(config, factory))
    }

    pub fn measure(&self) -> &ActiveMeasure {
        &self.measure
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    pub async fn config(&self) -> Option<ServerConfig> {
        self.config.lock().await.clone()
    }

    /// Replaces the configuration; refused unless the server is stopped and the
    /// recommender it names is known
    pub async fn set_config(&self, config: ServerConfig) -> bool {
        if self.lifecycle.lock().await.started {
            tracing::warn!("Configuration can only be changed while stopped");
            return false;
        }
        let mut slot = self.config.lock().await;
        if slot.is_none() {
            return false;
        }
        let mut factory = self.factory.lock().await;
        if factory.name() != config.recommender {
            match recommender_factory(&config.recommender) {
                Ok(resolved) => *factory = resolved,
                Err(e) => {
                    tracing::warn!(error = %e, "Configuration rejected");
                    return false;
                }
            }
        }
        *slot = Some(config);
        true
    }

    pub async fn add_listener(&self, listener: Arc<dyn StatusListener>) {
        self.listeners.lock().await.push(listener);
    }

    async fn notify(&self, status: ServerStatus) {
        tracing::info!(status = ?status, "Server status changed");
        for listener in self.listeners.lock().await.iter() {
            listener.on_status(status);
        }
    }

    pub async fn is_started(&self) -> bool {
        self.lifecycle.lock().await.started
    }

    pub async fn is_paused(&self) -> bool {
        self.lifecycle.lock().await.paused.is_some()
    }

    pub async fn is_running(&self) -> bool {
        let lifecycle = self.lifecycle.lock().await;
        lifecycle.started && lifecycle.paused.is_none()
    }

    pub async fn ping(&self) -> bool {
        self.is_started().await
    }

    /// Opens the store, bootstrapping the schema when it is missing, opens the service
    /// and arms the retrain timer
    pub async fn start(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.started {
            return true;
        }
        let Some(config) = self.config().await else {
            tracing::warn!("Server has been shut down");
            return false;
        };
        let data = config.data_config();
        if data.store_uri.contains(":memory:") {
            tracing::warn!(
                store = %data.store_uri,
                "Private in-memory store: the service and its snapshots each open a separate database"
            );
        }

        let store = match Provider::open(data.clone()).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!(store = %data.store_uri, error = %e, "Failed to open store");
                return false;
            }
        };
        if !store.is_schema_ready().await && !store.create_schema().await {
            tracing::error!(store = %data.store_uri, "Failed to create schema");
            store.close().await;
            return false;
        }

        let factory = self.factory.lock().await.clone();
        if let Err(e) = self.service.open(&data, factory.as_ref()).await {
            tracing::error!(error = %e, "Failed to open service");
            store.close().await;
            return false;
        }

        self.measure.reset();
        lifecycle.store = Some(store);
        lifecycle.timer = self.arm_timer(&config, factory);
        lifecycle.started = true;
        drop(lifecycle);

        self.notify(ServerStatus::Started).await;
        true
    }

    /// Blocks every request by holding the write lock until [`PowerServer::resume`]
    pub async fn pause(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.started {
            return false;
        }
        if lifecycle.paused.is_some() {
            return true;
        }
        lifecycle.disarm();
        lifecycle.paused = Some(self.transaction.write().await);
        drop(lifecycle);

        self.notify(ServerStatus::Paused).await;
        true
    }

    /// Releases the pause; does nothing when the server is not paused
    pub async fn resume(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(guard) = lifecycle.paused.take() else {
            return false;
        };
        drop(guard);
        if let Some(config) = self.config().await {
            let factory = self.factory.lock().await.clone();
            lifecycle.timer = self.arm_timer(&config, factory);
        }
        drop(lifecycle);

        self.notify(ServerStatus::Resumed).await;
        true
    }

    pub async fn stop(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.started {
            return true;
        }
        lifecycle.disarm();
        lifecycle.paused = None;
        self.service.close().await;
        if let Some(store) = lifecycle.store.take() {
            store.close().await;
        }
        lifecycle.started = false;
        drop(lifecycle);

        self.notify(ServerStatus::Stopped).await;
        true
    }

    /// Stops the server, persists the configuration and releases it. Later calls return
    /// false without doing anything.
    pub async fn shutdown(&self) -> bool {
        self.stop().await;
        let Some(config) = self.config.lock().await.take() else {
            return false;
        };
        if let Err(e) = config.save().await {
            tracing::error!(error = %e, "Failed to save configuration");
        }
        self.notify(ServerStatus::Exit).await;
        true
    }

    /// Shuts down and terminates the process
    pub async fn exit(&self) {
        self.shutdown().await;
        std::process::exit(0);
    }

    /// Builds a fresh recommender and swaps it into the live service
    pub async fn retrain(&self) -> bool {
        let Some(config) = self.config().await else {
            return false;
        };
        let factory = self.factory.lock().await.clone();
        retrain(&self.service, &config.data_config(), factory.as_ref()).await
    }

    fn arm_timer(&self, config: &ServerConfig, factory: Arc<dyn RecommenderFactory>) -> Option<JoinHandle<()>> {
        if !config.period_learn || config.server_tasks_period_ms == 0 {
            return None;
        }
        let service = self.service.clone();
        let data = config.data_config();
        let period = Duration::from_millis(config.server_tasks_period_ms);

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                retrain(&service, &data, factory.as_ref()).await;
            }
        }))
    }

    /// Account check against the live store, or a temporary one while stopped
    pub async fn validate_account(&self, name: &str, password: &str, privileges: Privileges) -> bool {
        let store = self.lifecycle.lock().await.store.clone();
        if let Some(store) = store {
            return store.validate_account(name, password, privileges).await;
        }

        let Some(config) = self.config().await else {
            return false;
        };
        match Provider::open(config.data_config()).await {
            Ok(store) => {
                let valid = store.validate_account(name, password, privileges).await;
                store.close().await;
                valid
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to open store for account validation");
                false
            }
        }
    }
}

async fn retrain(live: &Service, data: &DataConfig, factory: &dyn RecommenderFactory) -> bool {
    let fresh = Service::new(Transaction::new());
    if let Err(e) = fresh.open(data, factory).await {
        tracing::warn!(error = %e, "Periodic retrain failed");
        return false;
    }
    fresh.transfer_to(live).await
}
