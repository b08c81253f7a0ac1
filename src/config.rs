use crate::error::ConfigError;
use secrecy::SecretString;

#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub mongo: MongoConfig,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Credentials and tuning for the external vision/LLM provider. Both the
/// OCR stage and the grading engine's evaluator personas are backed by the
/// same Gemini API key; the spec treats the provider as a single external
/// collaborator reachable through two narrow traits.
#[derive(Clone)]
pub struct ProvidersConfig {
    pub gemini_api_key: Option<SecretString>,
    pub default_timeout_secs: u64,
}

/// Object storage for page images. Out of scope per spec.md; this config
/// is still parsed so a real MinIO-backed `ImageStore` can be wired in
/// without touching the pipeline.
#[derive(Clone)]
pub struct StorageConfig {
    pub minio_endpoint: Option<String>,
    pub minio_access_key: Option<SecretString>,
    pub minio_secret_key: Option<SecretString>,
    pub minio_bucket: Option<String>,
}

#[derive(Clone)]
pub struct PipelineConfig {
    pub worker_pool_size: usize,
    pub worker_queue_capacity: usize,
    pub ocr_deadline_secs: u64,
    pub submission_ttl_secs: u64,
}

#[derive(Clone)]
pub struct MongoConfig {
    pub database_url: Option<SecretString>,
    pub database_name: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig {
                host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".into()))?,
            },
            providers: ProvidersConfig {
                gemini_api_key: std::env::var("GEMINI_API_KEY").ok().map(SecretString::from),
                default_timeout_secs: std::env::var("LLM_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()
                    .unwrap_or(120),
            },
            storage: StorageConfig {
                minio_endpoint: std::env::var("MINIO_ENDPOINT").ok(),
                minio_access_key: std::env::var("MINIO_ACCESS_KEY").ok().map(SecretString::from),
                minio_secret_key: std::env::var("MINIO_SECRET_KEY").ok().map(SecretString::from),
                minio_bucket: std::env::var("MINIO_BUCKET").ok(),
            },
            pipeline: PipelineConfig {
                worker_pool_size: std::env::var("WORKER_POOL_SIZE")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                worker_queue_capacity: std::env::var("WORKER_QUEUE_CAPACITY")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000),
                ocr_deadline_secs: 25,
                submission_ttl_secs: std::env::var("SUBMISSION_TTL_SECS")
                    .unwrap_or_else(|_| "86400".to_string())
                    .parse()
                    .unwrap_or(86400),
            },
            mongo: MongoConfig {
                database_url: std::env::var("DATABASE_URL").ok().map(SecretString::from),
                database_name: std::env::var("DATABASE_NAME")
                    .unwrap_or_else(|_| "gradeflow".to_string()),
            },
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            default_timeout_secs: 120,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            minio_endpoint: None,
            minio_access_key: None,
            minio_secret_key: None,
            minio_bucket: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 10,
            worker_queue_capacity: 1000,
            ocr_deadline_secs: 25,
            submission_ttl_secs: 86400,
        }
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_name: "gradeflow".to_string(),
        }
    }
}
