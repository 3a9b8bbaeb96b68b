use crate::error::{ConfigError, ConfigResult};
use clap::Parser;
use gethostname::gethostname;
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tokio::fs;
use tracing::{info, instrument, warn};

#[derive(Parser)]
#[command(author, version, about, long_about)]
pub struct Args {
    /// Path to a YAML config file, layered under environment variables.
    #[arg(short, long, env = "CALLBRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub name: String,
    pub instance: InstanceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "callbridge-engine".to_owned(),
            instance: InstanceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    pub name: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: gethostname().to_string_lossy().to_string(),
        }
    }
}

/// Framed-TCP (AudioSocket dialect) acceptor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 9092,
        }
    }
}

/// RTP dialect socket pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpConfig {
    pub bind_host: IpAddr,
    pub port_start: u16,
    pub port_end: u16,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port_start: 30_000,
            port_end: 30_100,
        }
    }
}

/// Knobs for the AI-side WebSocket session.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    pub ws_url: String,
    pub api_key: String,
    pub voice: String,
    pub model: String,
    pub system_prompt: String,
    pub vad_threshold: f32,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,
    pub warmup_silence_ms: u32,
    #[serde(default, with = "serde_millis")]
    pub connect_timeout: Duration,
    #[serde(default, with = "serde_millis")]
    pub ping_interval: Duration,
    #[serde(default, with = "serde_millis")]
    pub ping_timeout: Duration,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            api_key: String::new(),
            voice: "shimmer".to_owned(),
            model: "realtime".to_owned(),
            system_prompt: String::new(),
            vad_threshold: 0.35,
            vad_prefix_padding_ms: 400,
            vad_silence_duration_ms: 800,
            warmup_silence_ms: 200,
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(20),
        }
    }
}

/// DSP pipeline tuning knobs (§4.1).
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DspConfig {
    pub volume_boost: f32,
    pub pre_emphasis_coeff: f32,
    pub noise_gate_threshold: f32,
    pub target_rms: f32,
    pub send_native_ulaw: bool,
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            volume_boost: 2.5,
            pre_emphasis_coeff: 0.97,
            noise_gate_threshold: 25.0,
            target_rms: 2500.0,
            send_native_ulaw: false,
        }
    }
}

/// Jitter buffer / pacer configuration (§4.4).
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JitterConfig {
    pub jitter_buffer_ms: u32,
    pub keepalive_ms: u32,
    pub max_queue_frames: usize,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            jitter_buffer_ms: 250,
            keepalive_ms: 1000,
            max_queue_frames: 200,
        }
    }
}

/// Control-plane REST client configuration, used only by the RTP dialect to
/// provision `externalMedia` channels and handle transfers (§4.3, §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AriConfig {
    pub base_url: String,
    pub app: String,
    pub user: String,
    pub password: String,
    pub external_media_host: String,
    /// Dialplan destination used by the `transfer_to_operator` tool side-channel (§4.5).
    pub transfer_context: String,
    pub transfer_extension: String,
    pub transfer_priority: u32,
}

impl Default for AriConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            app: "callbridge".to_owned(),
            user: String::new(),
            password: String::new(),
            external_media_host: String::new(),
            transfer_context: "operators".to_owned(),
            transfer_extension: "s".to_owned(),
            transfer_priority: 1,
        }
    }
}

/// Reconnect/resume policy (§4.6).
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    #[serde(default, with = "serde_millis")]
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "AppConfig::default")]
    pub app: AppConfig,
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub rtp: RtpConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub dsp: DspConfig,
    #[serde(default)]
    pub jitter: JitterConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub ari: AriConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: Default::default(),
            listen: Default::default(),
            rtp: Default::default(),
            ai: Default::default(),
            dsp: Default::default(),
            jitter: Default::default(),
            reconnect: Default::default(),
            ari: Default::default(),
        }
    }
}

impl Config {
    #[instrument]
    pub async fn load() -> ConfigResult<Config> {
        let args = Args::parse();

        info!("Loading config …");

        let mut config = Config::load_from_file(args.config.as_deref()).await?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    #[instrument]
    async fn load_from_file(path: Option<&Path>) -> ConfigResult<Config> {
        match path {
            Some(path) => {
                let content = fs::read_to_string(&path).await?;
                let config = serde_yaml::from_str(&content)?;
                info!("Config loaded from {}", path.to_string_lossy());
                Ok(config)
            }
            None => {
                warn!("No config file specified, using built-in defaults layered with env vars");
                Ok(Config::default())
            }
        }
    }

    /// Environment variables take precedence over the YAML file and defaults (§6).
    fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        if let Some(v) = env_string("AI_WS_URL") {
            self.ai.ws_url = v;
        }
        if let Some(v) = env_string("API_KEY") {
            self.ai.api_key = v;
        }
        overlay_string(&mut self.ai.voice, "AI_VOICE");
        overlay_string(&mut self.ai.model, "AI_MODEL");
        overlay_string(&mut self.ai.system_prompt, "SYSTEM_PROMPT");
        overlay_parsed(&mut self.ai.vad_threshold, "VAD_THRESHOLD")?;
        overlay_parsed(&mut self.ai.vad_prefix_padding_ms, "VAD_PREFIX_PADDING_MS")?;
        overlay_parsed(&mut self.ai.vad_silence_duration_ms, "VAD_SILENCE_DURATION_MS")?;
        overlay_millis(&mut self.ai.warmup_silence_ms, "WARMUP_SILENCE_MS")?;

        overlay_parsed(&mut self.listen.host, "LISTEN_HOST")?;
        overlay_parsed(&mut self.listen.port, "LISTEN_PORT")?;

        overlay_parsed(&mut self.rtp.bind_host, "RTP_BIND_HOST")?;
        overlay_parsed(&mut self.rtp.port_start, "RTP_PORT_START")?;
        overlay_parsed(&mut self.rtp.port_end, "RTP_PORT_END")?;

        overlay_millis(&mut self.jitter.jitter_buffer_ms, "JITTER_BUFFER_MS")?;
        overlay_millis(&mut self.jitter.keepalive_ms, "KEEPALIVE_MS")?;

        overlay_parsed(&mut self.dsp.volume_boost, "VOLUME_BOOST")?;
        overlay_parsed(&mut self.dsp.pre_emphasis_coeff, "PRE_EMPHASIS_COEFF")?;
        overlay_parsed(&mut self.dsp.noise_gate_threshold, "NOISE_GATE_THRESHOLD")?;
        overlay_parsed(&mut self.dsp.target_rms, "TARGET_RMS")?;
        overlay_bool(&mut self.dsp.send_native_ulaw, "SEND_NATIVE_ULAW");

        overlay_parsed(&mut self.reconnect.max_attempts, "MAX_RECONNECT_ATTEMPTS")?;
        if let Some(v) = env_string("RECONNECT_BASE_DELAY_S") {
            let secs: f64 = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name: "RECONNECT_BASE_DELAY_S", value: v })?;
            self.reconnect.base_delay = Duration::from_secs_f64(secs);
        }

        overlay_string(&mut self.ari.base_url, "ARI_BASE_URL");
        overlay_string(&mut self.ari.app, "ARI_APP");
        overlay_string(&mut self.ari.user, "ARI_USER");
        overlay_string(&mut self.ari.password, "ARI_PASSWORD");
        overlay_string(&mut self.ari.external_media_host, "ARI_EXTERNAL_MEDIA_HOST");
        overlay_string(&mut self.ari.transfer_context, "ARI_TRANSFER_CONTEXT");
        overlay_string(&mut self.ari.transfer_extension, "ARI_TRANSFER_EXTENSION");
        overlay_parsed(&mut self.ari.transfer_priority, "ARI_TRANSFER_PRIORITY")?;

        Ok(())
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.ai.api_key.trim().is_empty() {
            return Err(ConfigError::MissingEnv("API_KEY"));
        }
        if self.ai.ws_url.trim().is_empty() {
            return Err(ConfigError::MissingEnv("AI_WS_URL"));
        }
        if self.rtp.port_start > self.rtp.port_end {
            return Err(ConfigError::InvalidValue {
                name: "RTP_PORT_START/RTP_PORT_END",
                value: format!("{}..{}", self.rtp.port_start, self.rtp.port_end),
            });
        }
        Ok(())
    }

    pub fn instance_name(&self) -> String {
        format!("{}/{}", self.app.name, self.app.instance.name)
    }
}

fn env_string(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn overlay_string(field: &mut String, name: &'static str) {
    if let Some(v) = env_string(name) {
        *field = v;
    }
}

fn overlay_bool(field: &mut bool, name: &'static str) {
    if let Some(v) = env_string(name) {
        *field = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
    }
}

fn overlay_parsed<T: FromStr>(field: &mut T, name: &'static str) -> ConfigResult<()> {
    if let Some(v) = env_string(name) {
        *field = v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: v })?;
    }
    Ok(())
}

/// Millisecond env vars that land on plain numeric config fields (not `Duration`).
fn overlay_millis<T: FromStr>(field: &mut T, name: &'static str) -> ConfigResult<()> {
    overlay_parsed(field, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // `apply_env_overrides` reads process-global env vars; serialize the
    // tests that touch them so they don't race each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn env_override_wins_over_yaml_and_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();

        let mut config: Config = serde_yaml::from_str("ai:\n  voice: yaml-voice\n").expect("yaml parses");
        assert_eq!(config.ai.voice, "yaml-voice");

        unsafe { std::env::set_var("AI_VOICE", "env-voice") };
        config.apply_env_overrides().expect("overrides apply");
        unsafe { std::env::remove_var("AI_VOICE") };

        assert_eq!(config.ai.voice, "env-voice");
    }

    #[test]
    fn env_override_absent_leaves_yaml_value_in_place() {
        let _guard = ENV_LOCK.lock().unwrap();

        unsafe { std::env::remove_var("AI_VOICE") };
        let mut config: Config = serde_yaml::from_str("ai:\n  voice: yaml-voice\n").expect("yaml parses");
        config.apply_env_overrides().expect("overrides apply");

        assert_eq!(config.ai.voice, "yaml-voice");
    }

    #[test]
    fn validate_fails_fast_when_api_key_missing() {
        let _guard = ENV_LOCK.lock().unwrap();

        let config = Config { ai: AiConfig { ws_url: "wss://example.test".to_owned(), ..Default::default() }, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::MissingEnv("API_KEY"))));
    }

    #[test]
    fn validate_passes_once_api_key_and_ws_url_are_set() {
        let _guard = ENV_LOCK.lock().unwrap();

        let config = Config {
            ai: AiConfig { api_key: "secret".to_owned(), ws_url: "wss://example.test".to_owned(), ..Default::default() },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
