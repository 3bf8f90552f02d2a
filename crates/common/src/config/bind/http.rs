use serde::{Deserialize, Serialize};

/// HTTP 服务绑定配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpBindConfig {
    /// 绑定地址
    ///
    /// 可以是 IP 地址，也可以是可解析的主机名（如 "localhost"）。
    /// 使用 "0.0.0.0" 监听所有接口。
    #[serde(default = "default_ip")]
    pub ip: String,

    /// 绑定端口
    ///
    /// HTTP 服务监听的端口号，0 表示由操作系统分配。
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_ip() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for HttpBindConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
        }
    }
}

impl HttpBindConfig {
    /// `host:port` 形式的监听地址
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}
