// Environment variable overrides
//
// Secrets never have to live in the config file: FUSILLADE_CLIENT_SECRET,
// FUSILLADE_PASSWORD and FUSILLADE_STATIC_TOKEN replace their config
// counterparts when set.

use crate::schema::{AuthConfig, Config};
use std::env;

/// Apply environment variable overrides to a loaded configuration
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(target) = env::var("FUSILLADE_TARGET") {
        config.target = Some(target);
    }

    if let Ok(concurrency) = env::var("FUSILLADE_CONCURRENCY") {
        if let Ok(n) = concurrency.parse() {
            config.concurrency = n;
        }
    }

    if let Ok(rate) = env::var("FUSILLADE_RATE") {
        if let Ok(r) = rate.parse() {
            config.rate = Some(r);
        }
    }

    match config.auth.as_mut() {
        Some(AuthConfig::Static { token }) => {
            if let Ok(t) = env::var("FUSILLADE_STATIC_TOKEN") {
                *token = t;
            }
        }
        Some(AuthConfig::ClientCredentials { client_secret, .. }) => {
            if let Ok(secret) = env::var("FUSILLADE_CLIENT_SECRET") {
                *client_secret = secret;
            }
        }
        Some(AuthConfig::Password {
            client_secret,
            password,
            ..
        }) => {
            if let Ok(secret) = env::var("FUSILLADE_CLIENT_SECRET") {
                *client_secret = secret;
            }
            if let Ok(pw) = env::var("FUSILLADE_PASSWORD") {
                *password = pw;
            }
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_override() {
        std::env::set_var("FUSILLADE_TARGET", "http://override:1234");
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.target.as_deref(), Some("http://override:1234"));
        std::env::remove_var("FUSILLADE_TARGET");
    }

    #[test]
    fn test_secret_override() {
        std::env::set_var("FUSILLADE_CLIENT_SECRET", "s3cret");
        let mut config = Config {
            auth: Some(AuthConfig::ClientCredentials {
                token_url: "http://auth/token".to_string(),
                client_id: "cli".to_string(),
                client_secret: "from-file".to_string(),
                scopes: Vec::new(),
                refresh_before_expiry_s: 30,
            }),
            ..Config::default()
        };
        apply_env_overrides(&mut config);
        match config.auth.unwrap() {
            AuthConfig::ClientCredentials { client_secret, .. } => {
                assert_eq!(client_secret, "s3cret");
            }
            _ => panic!("auth kind changed"),
        }
        std::env::remove_var("FUSILLADE_CLIENT_SECRET");
    }
}
