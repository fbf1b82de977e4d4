//! Infrastructure adapters: process configuration, the Redis cache store and
//! the RabbitMQ message channel.

pub mod config;

#[cfg(feature = "redis")]
pub mod redis_cache;

#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;

pub use config::{AppConfig, ConfigError, jwt_settings_from_env, jwt_settings_from_lookup};

#[cfg(feature = "redis")]
pub use redis_cache::RedisCacheStore;

#[cfg(feature = "rabbitmq")]
pub use rabbitmq::RabbitMqChannel;
