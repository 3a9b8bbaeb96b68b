use miette::Diagnostic;
use rtp_rs::RtpReaderError;
use std::{fmt::Display, io};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    IoError(#[from] io::Error),
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug, Diagnostic)]
pub struct WrappedRtpError(pub RtpReaderError);

impl Display for WrappedRtpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[derive(Error, Debug, Diagnostic)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("HTTP request error: {0}")]
    HttpRequestError(#[from] reqwest::Error),
    #[error("JSON serde error: {0}")]
    JsonSerdeError(#[from] serde_json::Error),
    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Received invalid RTP data: {0:?}")]
    InvalidRtpData(#[from] WrappedRtpError),
    #[error("Protocol error: {0}")]
    ProtocolError(String),
    #[error("Switch connection truncated mid-frame")]
    Truncated,
    #[error("RTP port pool exhausted")]
    PortPoolExhausted,
    #[error("Call formally ended, no reconnect attempted")]
    CallFormallyEnded,
    #[error("Reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("General error: {0}")]
    Other(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
