use std::fmt;

#[derive(Debug, Clone)]
pub enum OctolinkError {
    InvalidInput(String),
    NotFound(String),
    Expired(String),
    CapacityExhausted(String),
    Persistence(String),
    CacheConnection(String),
    IndexBackend(String),
    DatabaseConfig(String),
    DatabaseConnection(String),
    Serialization(String),
    DateParse(String),
    Config(String),
    Io(String),
}

impl OctolinkError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            OctolinkError::InvalidInput(_) => "E001",
            OctolinkError::NotFound(_) => "E002",
            OctolinkError::Expired(_) => "E003",
            OctolinkError::CapacityExhausted(_) => "E004",
            OctolinkError::Persistence(_) => "E005",
            OctolinkError::CacheConnection(_) => "E006",
            OctolinkError::IndexBackend(_) => "E007",
            OctolinkError::DatabaseConfig(_) => "E008",
            OctolinkError::DatabaseConnection(_) => "E009",
            OctolinkError::Serialization(_) => "E010",
            OctolinkError::DateParse(_) => "E011",
            OctolinkError::Config(_) => "E012",
            OctolinkError::Io(_) => "E013",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            OctolinkError::InvalidInput(_) => "Invalid Input",
            OctolinkError::NotFound(_) => "Short Link Not Found",
            OctolinkError::Expired(_) => "Short Link Expired",
            OctolinkError::CapacityExhausted(_) => "Code Space Exhausted",
            OctolinkError::Persistence(_) => "Persistence Error",
            OctolinkError::CacheConnection(_) => "Cache Connection Error",
            OctolinkError::IndexBackend(_) => "Membership Index Error",
            OctolinkError::DatabaseConfig(_) => "Database Configuration Error",
            OctolinkError::DatabaseConnection(_) => "Database Connection Error",
            OctolinkError::Serialization(_) => "Serialization Error",
            OctolinkError::DateParse(_) => "Date Parse Error",
            OctolinkError::Config(_) => "Configuration Error",
            OctolinkError::Io(_) => "I/O Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            OctolinkError::InvalidInput(msg)
            | OctolinkError::NotFound(msg)
            | OctolinkError::Expired(msg)
            | OctolinkError::CapacityExhausted(msg)
            | OctolinkError::Persistence(msg)
            | OctolinkError::CacheConnection(msg)
            | OctolinkError::IndexBackend(msg)
            | OctolinkError::DatabaseConfig(msg)
            | OctolinkError::DatabaseConnection(msg)
            | OctolinkError::Serialization(msg)
            | OctolinkError::DateParse(msg)
            | OctolinkError::Config(msg)
            | OctolinkError::Io(msg) => msg,
        }
    }

    /// 客户端错误：请求本身有问题，原样重试不会成功
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            OctolinkError::InvalidInput(_)
                | OctolinkError::NotFound(_)
                | OctolinkError::Expired(_)
                | OctolinkError::DateParse(_)
        )
    }

    /// 格式化为彩色输出（用于 Server 模式）
    #[cfg(feature = "server")]
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        format!(
            "{} {} {}\n  {}",
            "[ERROR]".red().bold(),
            self.code().yellow(),
            self.error_type().red(),
            self.message().white()
        )
    }

    /// 格式化为简洁输出
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for OctolinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for OctolinkError {}

// 便捷的构造函数
impl OctolinkError {
    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        OctolinkError::InvalidInput(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        OctolinkError::NotFound(msg.into())
    }

    pub fn expired<T: Into<String>>(msg: T) -> Self {
        OctolinkError::Expired(msg.into())
    }

    pub fn capacity_exhausted<T: Into<String>>(msg: T) -> Self {
        OctolinkError::CapacityExhausted(msg.into())
    }

    pub fn persistence<T: Into<String>>(msg: T) -> Self {
        OctolinkError::Persistence(msg.into())
    }

    pub fn cache_connection<T: Into<String>>(msg: T) -> Self {
        OctolinkError::CacheConnection(msg.into())
    }

    pub fn index_backend<T: Into<String>>(msg: T) -> Self {
        OctolinkError::IndexBackend(msg.into())
    }

    pub fn database_config<T: Into<String>>(msg: T) -> Self {
        OctolinkError::DatabaseConfig(msg.into())
    }

    pub fn database_connection<T: Into<String>>(msg: T) -> Self {
        OctolinkError::DatabaseConnection(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        OctolinkError::Serialization(msg.into())
    }

    pub fn date_parse<T: Into<String>>(msg: T) -> Self {
        OctolinkError::DateParse(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        OctolinkError::Config(msg.into())
    }
}

// 为常见的错误类型实现 From trait
impl From<sea_orm::DbErr> for OctolinkError {
    fn from(err: sea_orm::DbErr) -> Self {
        OctolinkError::Persistence(err.to_string())
    }
}

impl From<redis::RedisError> for OctolinkError {
    fn from(err: redis::RedisError) -> Self {
        OctolinkError::CacheConnection(err.to_string())
    }
}

impl From<std::io::Error> for OctolinkError {
    fn from(err: std::io::Error) -> Self {
        OctolinkError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OctolinkError {
    fn from(err: serde_json::Error) -> Self {
        OctolinkError::Serialization(err.to_string())
    }
}

impl From<chrono::ParseError> for OctolinkError {
    fn from(err: chrono::ParseError) -> Self {
        OctolinkError::DateParse(err.to_string())
    }
}

impl From<config::ConfigError> for OctolinkError {
    fn from(err: config::ConfigError) -> Self {
        OctolinkError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OctolinkError>;
