use crate::memory::ArenaConfig;
use crate::net::{DEFAULT_MAX_RPC_ANSWER_LEN, DEFAULT_SLOT_CEILING};
use crate::QueryRuntimeConfig;

/// Ready-made runtime configurations for common deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPreset {
    /// Long-running server process handling many requests
    Production,
    /// Small limits so exhaustion paths show up quickly
    Development,
    /// Memory-constrained hosts
    LowMemory,
}

impl ConfigPreset {
    pub fn to_config(self) -> QueryRuntimeConfig {
        match self {
            ConfigPreset::Production => Self::production_config(),
            ConfigPreset::Development => Self::development_config(),
            ConfigPreset::LowMemory => Self::low_memory_config(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ConfigPreset::Production => "production",
            ConfigPreset::Development => "development",
            ConfigPreset::LowMemory => "low-memory",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "production" => Some(ConfigPreset::Production),
            "development" | "dev" => Some(ConfigPreset::Development),
            "low-memory" | "low_memory" => Some(ConfigPreset::LowMemory),
            _ => None,
        }
    }

    fn production_config() -> QueryRuntimeConfig {
        QueryRuntimeConfig::default()
    }

    fn development_config() -> QueryRuntimeConfig {
        QueryRuntimeConfig {
            arena: ArenaConfig {
                page_size: 64 * 1024,
                static_pages: 2,
                max_mem: 16 * 1024 * 1024,
                max_pages: 64,
            },
            slot_ceiling: 1_000_000,
            event_queue_capacity: 4096,
            query_queue_capacity: 4096,
            max_rpc_answer_len: 16 * 1024 * 1024,
            ..QueryRuntimeConfig::default()
        }
    }

    fn low_memory_config() -> QueryRuntimeConfig {
        QueryRuntimeConfig {
            arena: ArenaConfig {
                page_size: 256 * 1024,
                static_pages: 2,
                max_mem: 32 * 1024 * 1024,
                max_pages: 128,
            },
            slot_ceiling: DEFAULT_SLOT_CEILING,
            event_queue_capacity: 65_536,
            query_queue_capacity: 65_536,
            max_rpc_answer_len: DEFAULT_MAX_RPC_ANSWER_LEN.min(64 * 1024 * 1024),
            ..QueryRuntimeConfig::default()
        }
    }
}
