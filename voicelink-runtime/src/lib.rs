pub mod agent;
pub mod app_config;
pub mod config_store;
pub mod credentials;
pub mod defaults;
pub mod gate;

pub use agent::RealtimeAgentConnector;
pub use app_config::AppConfig;
pub use config_store::ConfigStore;
pub use gate::LineApprovalGate;
