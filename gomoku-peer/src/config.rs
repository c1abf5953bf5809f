//! 联机配置
//!
//! 从 JSON 文件加载，文件缺失或格式错误时使用默认值。
//! 信令与中继服务器参数对会话逻辑不透明，只原样交给传输层。

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use protocol::{Stone, TcpConfig, CONNECT_TIMEOUT_SECS};

/// 信令服务参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub secure: bool,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            host: "0.peerjs.com".to_string(),
            port: 443,
            path: "/".to_string(),
            secure: true,
        }
    }
}

/// 穿透 / 中继服务器
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// 联机配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// 信令服务
    pub signaling: SignalingConfig,
    /// 穿透 / 中继服务器列表
    pub ice_servers: Vec<IceServer>,
    /// 客人等待连接打开的时间（秒）
    pub connect_timeout_secs: u64,
    /// 房间号冲突时最多尝试几个房间号，1 表示不重试
    pub max_room_code_attempts: u32,
    /// 直连 TCP 地址
    pub tcp: TcpConfig,
    /// 房主执子偏好，不设置则随机
    pub preferred_color: Option<Stone>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig::default(),
            ice_servers: vec![IceServer {
                urls: "stun:stun.l.google.com:19302".to_string(),
                username: None,
                credential: None,
            }],
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            max_room_code_attempts: 1,
            tcp: TcpConfig::default(),
            preferred_color: None,
        }
    }
}

impl PeerConfig {
    /// 客人等待连接打开的时间
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// 从文件加载配置
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            tracing::info!("配置文件不存在: {:?}，使用默认配置", path);
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    tracing::info!("已加载配置: {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::warn!("配置文件格式无效: {}，使用默认配置", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("无法读取配置文件: {}，使用默认配置", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PeerConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_room_code_attempts, 1);
        assert_eq!(config.signaling.port, 443);
        assert!(config.preferred_color.is_none());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: PeerConfig = serde_json::from_str(
            r#"{"connect_timeout_secs": 3, "preferred_color": "white",
                "ice_servers": [{"urls": "turn:relay.example:3478", "username": "u", "credential": "c"}]}"#,
        )
        .unwrap();
        assert_eq!(config.connect_timeout_secs, 3);
        assert_eq!(config.preferred_color, Some(Stone::White));
        assert_eq!(config.ice_servers[0].username.as_deref(), Some("u"));
        assert_eq!(config.signaling, SignalingConfig::default());
        assert_eq!(config.tcp, TcpConfig::default());
    }

    #[test]
    fn test_load_missing_and_invalid() {
        assert_eq!(PeerConfig::load(None), PeerConfig::default());

        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("missing.json");
        assert_eq!(PeerConfig::load(Some(&missing)), PeerConfig::default());

        let invalid = dir.path().join("invalid.json");
        std::fs::write(&invalid, "{ not json").unwrap();
        assert_eq!(PeerConfig::load(Some(&invalid)), PeerConfig::default());

        let valid = dir.path().join("valid.json");
        std::fs::write(&valid, r#"{"max_room_code_attempts": 3}"#).unwrap();
        assert_eq!(PeerConfig::load(Some(&valid)).max_room_code_attempts, 3);
    }
}
