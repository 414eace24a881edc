use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::auth::IdentityVerifier;
use crate::mining::{MiningError, MiningParams};
use crate::repositories::Storage;
use crate::settings::Settings;

mod http;
pub mod mining;
pub mod users;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Mining(#[from] MiningError),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

#[derive(Clone)]
pub struct Channels {
    pub mining: mpsc::Sender<mining::MiningRequest>,
    pub users: mpsc::Sender<users::UserRequest>,
}

/// Spawns the mining and user services and returns their request channels.
pub fn spawn_services(
    storage: Arc<dyn Storage>,
    params: MiningParams,
    public_url: String,
) -> Channels {
    let (mining_tx, mut mining_rx) = mpsc::channel(512);
    let (user_tx, mut user_rx) = mpsc::channel(512);

    let mut mining_service = mining::MiningService::new();
    let mut user_service = users::UserService::new();

    log::info!("Starting mining service.");
    let mining_storage = storage.clone();
    tokio::spawn(async move {
        let handler = mining::MiningRequestHandler::new(
            mining_storage,
            Arc::new(mining::ReportedAdOutcome),
            params,
            public_url,
        );

        mining_service.run(handler, &mut mining_rx).await;
    });

    log::info!("Starting user service.");
    let user_mining_tx = mining_tx.clone();
    tokio::spawn(async move {
        user_service
            .run(
                users::UserRequestHandler::new(storage, user_mining_tx),
                &mut user_rx,
            )
            .await;
    });

    Channels {
        mining: mining_tx,
        users: user_tx,
    }
}

pub async fn start_services(
    storage: Arc<dyn Storage>,
    verifier: Arc<dyn IdentityVerifier>,
    settings: Settings,
    listen: &str,
) -> Result<(), anyhow::Error> {
    let params = MiningParams::try_from(&settings.mining)?;
    let channels = spawn_services(storage, params, settings.server.public_url.clone());

    log::info!("Starting HTTP server.");
    http::start_http_server(channels, verifier, &settings.server, listen).await
}
