use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub bind_address: String,
    pub scheduling: SchedulingRules,
}

/// Clinic-wide scheduling knobs. Business rules the clinic has not settled
/// on (notice periods, admin overrides) live here instead of in code.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingRules {
    pub slot_granularity_minutes: u32,
    pub min_booking_notice_minutes: i64,
    pub min_cancellation_notice_minutes: i64,
    pub max_availability_range_days: i64,
    pub allow_admin_template_override: bool,
    pub store_timeout_seconds: u64,
}

impl Default for SchedulingRules {
    fn default() -> Self {
        Self {
            slot_granularity_minutes: 15,
            min_booking_notice_minutes: 0,
            min_cancellation_notice_minutes: 0,
            max_availability_range_days: 62,
            allow_admin_template_override: true,
            store_timeout_seconds: 10,
        }
    }
}

impl SchedulingRules {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let rules = Self {
            slot_granularity_minutes: env_or(
                "SLOT_GRANULARITY_MINUTES",
                defaults.slot_granularity_minutes,
            ),
            min_booking_notice_minutes: env_or(
                "MIN_BOOKING_NOTICE_MINUTES",
                defaults.min_booking_notice_minutes,
            ),
            min_cancellation_notice_minutes: env_or(
                "MIN_CANCELLATION_NOTICE_MINUTES",
                defaults.min_cancellation_notice_minutes,
            ),
            max_availability_range_days: env_or(
                "MAX_AVAILABILITY_RANGE_DAYS",
                defaults.max_availability_range_days,
            ),
            allow_admin_template_override: env_or(
                "ALLOW_ADMIN_TEMPLATE_OVERRIDE",
                defaults.allow_admin_template_override,
            ),
            store_timeout_seconds: env_or("STORE_TIMEOUT_SECONDS", defaults.store_timeout_seconds),
        };

        if rules.slot_granularity_minutes == 0 || 1440 % rules.slot_granularity_minutes != 0 {
            warn!(
                "SLOT_GRANULARITY_MINUTES={} does not divide a day, using {}",
                rules.slot_granularity_minutes, defaults.slot_granularity_minutes
            );
            return Self {
                slot_granularity_minutes: defaults.slot_granularity_minutes,
                ..rules
            };
        }

        rules
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            scheduling: SchedulingRules::from_env(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}

fn env_or<T: FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has unparsable value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
