pub mod config;
pub mod responses;
pub mod workday;

pub use config::{
    AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, ReconnectConfig,
    ResponseConfig, SlackConfig, SpielConfig, StorageConfig, StorageDescriptor, WorkdayConfig,
};
pub use responses::{
    generate_go_home, is_tired, NudgeRng, ResponsePlan, ResponseSelector, StdNudgeRng,
    GO_HOME_LINES, GO_HOME_REACTION,
};
pub use workday::WorkdayWindow;
