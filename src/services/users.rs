use std::sync::Arc;

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::mining::MiningRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::auth::Session;
use crate::models::profiles::{NewProfile, Profile};
use crate::repositories::Storage;

const REFERRAL_CODE_LENGTH: usize = 10;
const CREATE_ATTEMPTS: usize = 3;

pub enum UserRequest {
    EnsureProfile {
        session: Session,
        referral_code: Option<String>,
        response: oneshot::Sender<Result<EnsuredProfile, ServiceError>>,
    },
}

#[derive(Debug, Serialize)]
pub struct EnsuredProfile {
    pub profile: Profile,
    pub created: bool,
    /// Why the referral code given at sign-up was not applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_error: Option<String>,
}

#[derive(Clone)]
pub struct UserRequestHandler {
    storage: Arc<dyn Storage>,
    mining_channel: mpsc::Sender<MiningRequest>,
}

impl UserRequestHandler {
    pub fn new(storage: Arc<dyn Storage>, mining_channel: mpsc::Sender<MiningRequest>) -> Self {
        UserRequestHandler {
            storage,
            mining_channel,
        }
    }

    async fn get_or_create(&self, session: &Session) -> Result<(Profile, bool), ServiceError> {
        if let Some(profile) = self
            .storage
            .get_profile(&session.user_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?
        {
            return Ok((profile, false));
        }

        let mut last_error = String::new();
        for _ in 0..CREATE_ATTEMPTS {
            let new_profile = NewProfile {
                id: session.user_id.clone(),
                email: session.email.clone(),
                display_name: session.display_name.clone(),
                photo_url: session.photo_url.clone(),
                referral_code: generate_referral_code(),
            };

            match self.storage.create_profile(new_profile).await {
                Ok(result) => return Ok(result),
                // Most likely a referral code collision, try a fresh one.
                Err(e) => {
                    log::warn!("Could not create profile {}: {}", session.user_id, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(ServiceError::Database(last_error))
    }

    async fn ensure_profile(
        &self,
        session: Session,
        referral_code: Option<String>,
    ) -> Result<EnsuredProfile, ServiceError> {
        let (profile, created) = self.get_or_create(&session).await?;
        if created {
            log::info!("Created profile for user {}", profile.id);
        }

        let code = match referral_code.filter(|code| created && !code.trim().is_empty()) {
            Some(code) => code,
            None => {
                return Ok(EnsuredProfile {
                    profile,
                    created,
                    referral_error: None,
                })
            }
        };

        let (mining_tx, mining_rx) = oneshot::channel();
        self.mining_channel
            .send(MiningRequest::AttributeReferral {
                user_id: profile.id.clone(),
                code,
                response: mining_tx,
            })
            .await
            .map_err(|e| ServiceError::Communication("User => Mining".to_string(), e.to_string()))?;

        let referral_error = match mining_rx.await.map_err(|e| {
            ServiceError::Communication("Mining => User".to_string(), e.to_string())
        })? {
            Ok(_) => None,
            Err(e) => {
                log::info!("Sign-up referral for {} not applied: {}", profile.id, e);
                Some(e.to_string())
            }
        };

        let profile = self
            .storage
            .get_profile(&profile.id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?
            .unwrap_or(profile);

        Ok(EnsuredProfile {
            profile,
            created,
            referral_error,
        })
    }
}

fn generate_referral_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERRAL_CODE_LENGTH)
        .map(char::from)
        .collect()
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::EnsureProfile {
                session,
                referral_code,
                response,
            } => {
                let profile = self.ensure_profile(session, referral_code).await;
                let _ = response.send(profile);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::mining::MiningParams;
    use crate::repositories::MemoryRepository;
    use crate::services::spawn_services;

    fn session(user_id: &str) -> Session {
        Session {
            user_id: user_id.to_string(),
            email: Some(format!("{}@example.com", user_id)),
            display_name: Some(user_id.to_uppercase()),
            photo_url: None,
        }
    }

    #[test]
    fn referral_codes_are_alphanumeric() {
        let code = generate_referral_code();
        assert_eq!(code.len(), REFERRAL_CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(code, generate_referral_code());
    }

    #[test]
    fn every_referral_code_position_is_uniform() {
        let mut seen = vec![HashSet::new(); REFERRAL_CODE_LENGTH];
        for _ in 0..5000 {
            for (position, c) in generate_referral_code().chars().enumerate() {
                seen[position].insert(c);
            }
        }

        for (position, chars) in seen.iter().enumerate() {
            assert!(
                chars.len() > 50,
                "position {} only produced {} characters",
                position,
                chars.len()
            );
        }
    }

    #[tokio::test]
    async fn profile_is_created_once() {
        let repository = Arc::new(MemoryRepository::new());
        let channels = spawn_services(
            repository.clone(),
            MiningParams::default(),
            "http://localhost".to_string(),
        );
        let handler = UserRequestHandler::new(repository, channels.mining);

        let first = handler.ensure_profile(session("alice"), None).await.unwrap();
        assert!(first.created);
        assert_eq!(first.profile.email.as_deref(), Some("alice@example.com"));
        assert_eq!(first.profile.balance.micros(), 0);

        let second = handler.ensure_profile(session("alice"), None).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.profile.referral_code, first.profile.referral_code);
    }

    #[tokio::test]
    async fn sign_up_referral_is_attributed() {
        let repository = Arc::new(MemoryRepository::new());
        let channels = spawn_services(
            repository.clone(),
            MiningParams::default(),
            "http://localhost".to_string(),
        );
        let handler = UserRequestHandler::new(repository.clone(), channels.mining);

        let alice = handler.ensure_profile(session("alice"), None).await.unwrap();
        let bob = handler
            .ensure_profile(session("bob"), Some(alice.profile.referral_code.clone()))
            .await
            .unwrap();

        assert!(bob.referral_error.is_none());
        assert_eq!(bob.profile.referred_by.as_deref(), Some("alice"));
        let alice = repository.get_profile("alice").await.unwrap().unwrap();
        assert_eq!(alice.referral_count, 1);

        let carol = handler
            .ensure_profile(session("carol"), Some("unknown".to_string()))
            .await
            .unwrap();
        assert!(carol.created);
        assert!(carol.referral_error.is_some());
        assert!(carol.profile.referred_by.is_none());
    }
}
