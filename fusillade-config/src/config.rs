// Configuration loading and validation
//
// Loading hierarchy: env > file > defaults

use crate::env::apply_env_overrides;
use crate::schema::*;
use std::path::Path;

/// Load configuration from a file, apply env overrides, and validate
pub fn load_config(path: &Path) -> ConfigResult<Config> {
    let mut config = load_from_file(path)?;
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML or JSON file, chosen by extension
pub fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string())),
        _ => serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string())),
    }
}

/// Validate a configuration before a run
pub fn validate_config(config: &Config) -> ConfigResult<()> {
    if config.concurrency < 1 {
        return Err(ConfigError::ValidationError(
            "concurrency must be at least 1".to_string(),
        ));
    }

    if config.timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "timeout_ms must be greater than 0".to_string(),
        ));
    }

    if config.target.is_none() && config.endpoints.is_empty() {
        return Err(ConfigError::ValidationError(
            "either target or endpoints must be set".to_string(),
        ));
    }

    if config.rate.is_some() && !config.load_patterns.is_empty() {
        return Err(ConfigError::ValidationError(
            "rate and load_patterns are mutually exclusive; load_patterns drive the rate"
                .to_string(),
        ));
    }

    if let Some(rate) = config.rate {
        if rate <= 0.0 {
            return Err(ConfigError::ValidationError(
                "rate must be greater than 0".to_string(),
            ));
        }
    }

    for endpoint in &config.endpoints {
        if endpoint.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "endpoint name must not be empty".to_string(),
            ));
        }
        if endpoint.url.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "endpoint {}: url must not be empty",
                endpoint.name
            )));
        }
        if endpoint.weight < 1 {
            return Err(ConfigError::ValidationError(format!(
                "endpoint {}: weight must be at least 1",
                endpoint.name
            )));
        }
        if endpoint.body.is_some() && endpoint.body_file.is_some() {
            return Err(ConfigError::ValidationError(format!(
                "endpoint {}: body and body_file are mutually exclusive",
                endpoint.name
            )));
        }
    }

    for pattern in &config.load_patterns {
        validate_pattern(pattern)?;
    }

    if config.body.is_some() && config.body_file.is_some() {
        return Err(ConfigError::ValidationError(
            "body and body_file are mutually exclusive".to_string(),
        ));
    }

    if config.protocol == Protocol::Grpc && config.grpc.is_none() {
        return Err(ConfigError::ValidationError(
            "protocol grpc requires a grpc section".to_string(),
        ));
    }

    Ok(())
}

fn validate_pattern(pattern: &LoadPattern) -> ConfigResult<()> {
    match pattern {
        LoadPattern::Constant { rps, duration_s } | LoadPattern::Spike { rps, duration_s } => {
            if *duration_s == 0 {
                return Err(ConfigError::ValidationError(
                    "load pattern duration_s must be greater than 0".to_string(),
                ));
            }
            if *rps <= 0.0 {
                return Err(ConfigError::ValidationError(
                    "load pattern rps must be greater than 0".to_string(),
                ));
            }
        }
        LoadPattern::Ramp {
            from_rps,
            to_rps,
            duration_s,
        } => {
            if *duration_s == 0 {
                return Err(ConfigError::ValidationError(
                    "ramp duration_s must be greater than 0".to_string(),
                ));
            }
            if *from_rps < 0.0 || *to_rps <= 0.0 {
                return Err(ConfigError::ValidationError(
                    "ramp rates must be non-negative and end above 0".to_string(),
                ));
            }
        }
        LoadPattern::Step { steps } => {
            if steps.is_empty() {
                return Err(ConfigError::ValidationError(
                    "step pattern requires at least one step".to_string(),
                ));
            }
            for step in steps {
                if step.duration_s == 0 || step.rps <= 0.0 {
                    return Err(ConfigError::ValidationError(
                        "each step requires rps > 0 and duration_s > 0".to_string(),
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_config() -> Config {
        Config {
            target: Some("http://localhost:8080".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults_validate() {
        let config = base_config();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.timeout_ms, 30_000);
    }

    #[test]
    fn test_missing_target_rejected() {
        let config = Config::default();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_rate_with_patterns_rejected() {
        let mut config = base_config();
        config.rate = Some(50.0);
        config.load_patterns = vec![LoadPattern::Constant {
            rps: 10.0,
            duration_s: 5,
        }];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_weight_rejected() {
        let mut config = base_config();
        config.endpoints = vec![EndpointConfig {
            name: "a".to_string(),
            weight: 0,
            url: "http://localhost/a".to_string(),
            method: None,
            headers: Default::default(),
            body: None,
            body_file: None,
            extractors: Vec::new(),
        }];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "target: http://localhost:9000\nconcurrency: 4\nrate: 25.5\n"
        )
        .unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.target.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.rate, Some(25.5));
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"{{"target": "http://localhost:9000", "protocol": "grpc", "grpc": {{"proto_file": "svc.proto", "service": "Echo", "method": "Ping"}}}}"#
        )
        .unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.protocol, Protocol::Grpc);
        assert_eq!(config.grpc.unwrap().service, "Echo");
    }

    #[test]
    fn test_load_patterns_parse() {
        let yaml = r#"
target: http://localhost:9000
load_patterns:
  - kind: ramp
    from_rps: 10
    to_rps: 100
    duration_s: 10
  - kind: step
    steps:
      - rps: 20
        duration_s: 5
      - rps: 40
        duration_s: 5
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.load_patterns.len(), 2);
        assert!(validate_config(&config).is_ok());
    }
}
