use std::sync::Arc;

use gohome_core::config::{AppConfig, ConfigError, LoadOptions, StorageDescriptor};
use gohome_core::responses::StdNudgeRng;
use gohome_slack::api::{ChatApi, MembershipApi, NoopSlackApi, UserDirectoryApi};
use gohome_slack::events::{bot_dispatcher, BotWiring};
use gohome_slack::socket::{
    NoopSocketTransport, ReconnectPolicy, SocketModeRunner, SocketTransport,
};
use thiserror::Error;
use tracing::{info, warn};

/// Client handles for the external platform. Defaults are inert; a live
/// deployment swaps in its own transport generation.
pub struct SlackClients {
    pub transport: Arc<dyn SocketTransport>,
    pub chat: Arc<dyn ChatApi>,
    pub membership: Arc<dyn MembershipApi>,
    pub users: Arc<dyn UserDirectoryApi>,
}

impl Default for SlackClients {
    fn default() -> Self {
        let api = Arc::new(NoopSlackApi);
        Self {
            transport: Arc::new(NoopSocketTransport),
            chat: api.clone(),
            membership: api.clone(),
            users: api,
        }
    }
}

pub struct Application {
    pub config: AppConfig,
    /// Persistence descriptor, selected here and passed along unopened.
    pub storage: StorageDescriptor,
    pub runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config, SlackClients::default()).await
}

pub async fn bootstrap_with_config(
    config: AppConfig,
    clients: SlackClients,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let storage = config.storage.descriptor();
    info!(
        event_name = "system.bootstrap.storage_selected",
        storage = ?storage,
        correlation_id = "bootstrap",
        "persistence descriptor selected"
    );

    greet_installer(clients.chat.as_ref(), &config).await;

    let wiring = BotWiring {
        spiel: config.spiel.clone(),
        window: config.workday.window(),
        selector: config.responses.selector(),
        chat: clients.chat.clone(),
        membership: clients.membership.clone(),
        users: clients.users.clone(),
    };
    let runner = SocketModeRunner::new(
        clients.transport,
        Box::new(move || bot_dispatcher(&wiring, Box::new(StdNudgeRng::from_entropy()))),
        config.slack.bot_user_id.clone(),
        ReconnectPolicy::from(&config.reconnect),
    );

    Ok(Application { config, storage, runner })
}

/// Installs get a two-line private greeting when the deployment knows who
/// installed the bot. Delivery failures are logged, never fatal.
async fn greet_installer(chat: &dyn ChatApi, config: &AppConfig) {
    let Some(installer) = config.slack.installer_user_id.as_deref() else {
        return;
    };

    let lines = [config.spiel.install_intro.as_str(), config.spiel.install_invite.as_str()];
    match chat.send_private_messages(installer, &lines).await {
        Ok(()) => info!(
            event_name = "system.bootstrap.installer_greeted",
            installer = %installer,
            "sent the install greeting"
        ),
        Err(error) => warn!(
            event_name = "system.bootstrap.installer_greeting_failed",
            installer = %installer,
            error = %error,
            "install greeting could not be delivered"
        ),
    }
}
