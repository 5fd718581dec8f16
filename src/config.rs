//! Configuration for EventHub
//!
//! CLI arguments and environment variable handling using clap. Values are read
//! once at startup and converted into the per-component config structs.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::cache::MediaCacheConfig;
use crate::jobs::{DispatchConfig, TrackerConfig};

const MB: u64 = 1024 * 1024;

/// EventHub media cache and background job service
#[derive(Parser, Debug, Clone)]
#[command(name = "eventhub")]
#[command(about = "Media cache and background job service for EventHub")]
#[command(version)]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Base URL media is fetched from on a cache miss (optional)
    #[arg(long, env = "MEDIA_ORIGIN_URL")]
    pub media_origin_url: Option<String>,

    /// Media cache configuration
    #[command(flatten)]
    pub cache: CacheArgs,

    /// Background job configuration
    #[command(flatten)]
    pub jobs: JobArgs,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Media cache sizing and expiry
#[derive(Parser, Debug, Clone)]
pub struct CacheArgs {
    /// Total byte budget for cached media, in MB
    #[arg(long, env = "CACHE_MAX_MB", default_value = "100")]
    pub cache_max_mb: u64,

    /// Largest single payload accepted, in MB
    #[arg(long, env = "CACHE_MAX_ITEM_MB", default_value = "50")]
    pub cache_max_item_mb: u64,

    /// Maximum number of cached media items
    #[arg(long, env = "CACHE_MAX_ITEMS", default_value = "1000")]
    pub cache_max_items: usize,

    /// TTL for images and videos
    #[arg(long, env = "CACHE_MEDIA_TTL_SECS", default_value = "3600")]
    pub cache_media_ttl_secs: u64,

    /// TTL for thumbnails
    #[arg(long, env = "CACHE_THUMBNAIL_TTL_SECS", default_value = "86400")]
    pub cache_thumbnail_ttl_secs: u64,

    /// TTL for ETags
    #[arg(long, env = "CACHE_ETAG_TTL_SECS", default_value = "86400")]
    pub cache_etag_ttl_secs: u64,

    /// TTL for media metadata
    #[arg(long, env = "CACHE_METADATA_TTL_SECS", default_value = "1800")]
    pub cache_metadata_ttl_secs: u64,

    /// Interval between cache health checks
    #[arg(long, env = "CACHE_HEALTH_CHECK_SECS", default_value = "300")]
    pub cache_health_check_secs: u64,
}

/// Batch sizes, pacing and job history
#[derive(Parser, Debug, Clone)]
pub struct JobArgs {
    /// Items per batch for bulk email
    #[arg(long, env = "EMAIL_BATCH_SIZE", default_value = "10")]
    pub email_batch_size: usize,

    /// Items per batch for notification pushes
    #[arg(long, env = "NOTIFICATION_BATCH_SIZE", default_value = "50")]
    pub notification_batch_size: usize,

    /// Items per batch for cache warm-up
    #[arg(long, env = "WARMUP_BATCH_SIZE", default_value = "5")]
    pub warmup_batch_size: usize,

    /// Pause between batches in milliseconds
    #[arg(long, env = "BATCH_DELAY_MS", default_value = "100")]
    pub batch_delay_ms: u64,

    /// Completed jobs kept in history
    #[arg(long, env = "JOB_HISTORY_CAPACITY", default_value = "100")]
    pub job_history_capacity: usize,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.cache.cache_max_mb == 0 {
            return Err("CACHE_MAX_MB must be greater than zero".to_string());
        }

        if self.cache.cache_max_item_mb > self.cache.cache_max_mb {
            return Err("CACHE_MAX_ITEM_MB must not exceed CACHE_MAX_MB".to_string());
        }

        if self.cache.cache_max_items == 0 {
            return Err("CACHE_MAX_ITEMS must be greater than zero".to_string());
        }

        if self.jobs.email_batch_size == 0
            || self.jobs.notification_batch_size == 0
            || self.jobs.warmup_batch_size == 0
        {
            return Err("Batch sizes must be greater than zero".to_string());
        }

        if self.jobs.job_history_capacity == 0 {
            return Err("JOB_HISTORY_CAPACITY must be greater than zero".to_string());
        }

        Ok(())
    }
}

impl From<&CacheArgs> for MediaCacheConfig {
    fn from(args: &CacheArgs) -> Self {
        Self {
            max_bytes: args.cache_max_mb * MB,
            max_item_bytes: args.cache_max_item_mb * MB,
            max_items: args.cache_max_items,
            media_ttl: Duration::from_secs(args.cache_media_ttl_secs),
            thumbnail_ttl: Duration::from_secs(args.cache_thumbnail_ttl_secs),
            etag_ttl: Duration::from_secs(args.cache_etag_ttl_secs),
            metadata_ttl: Duration::from_secs(args.cache_metadata_ttl_secs),
            health_check_interval: Duration::from_secs(args.cache_health_check_secs),
        }
    }
}

impl From<&JobArgs> for DispatchConfig {
    fn from(args: &JobArgs) -> Self {
        Self {
            email_batch_size: args.email_batch_size,
            notification_batch_size: args.notification_batch_size,
            warmup_batch_size: args.warmup_batch_size,
            batch_delay: Duration::from_millis(args.batch_delay_ms),
        }
    }
}

impl From<&JobArgs> for TrackerConfig {
    fn from(args: &JobArgs) -> Self {
        Self {
            history_capacity: args.job_history_capacity,
        }
    }
}
