//! Shared application state passed to every axum handler, grounded on the
//! teacher's `AppState`.

use std::sync::Arc;

use pylon_domain::config::RelayConfig;

use crate::auth::GoogleIdTokenVerifier;
use crate::registry::ClientRegistry;

#[derive(Clone)]
pub struct AppState {
    pub clients: Arc<ClientRegistry>,
    pub config: Arc<RelayConfig>,
    pub verifier: Arc<dyn GoogleIdTokenVerifier>,
}
