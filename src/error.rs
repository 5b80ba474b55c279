use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to reach peer: {0}")]
    Connect(String),
    #[error("failed sending message: {0}")]
    Send(String),
    #[error("link is not connected")]
    NotConnected,
    #[error("transport io error")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WireError {
    #[error("empty payload")]
    Empty,
    #[error("payload is not valid utf-8")]
    NotText,
    #[error("invalid angle value {0:?}")]
    InvalidValue(String),
    #[error("payload is the shutdown sentinel")]
    Sentinel,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed reading config file")]
    Io(#[from] std::io::Error),
    #[error("failed parsing config file")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to initialize transport session")]
    TransportInit(#[source] TransportError),
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
}
