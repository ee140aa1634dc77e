use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "TUBEQUOTA_LOG";

/// Log to stderr so stdout carries only command output. Called once, from `main`.
pub fn init_logging(level: &str) {
    // TUBEQUOTA_LOG, then RUST_LOG, then the --log-level flag.
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

fn default_directives(level: &str) -> String {
    format!("{level},tubequota_core={level},reqwest=warn,hyper=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_level_applies_to_the_core_crate_and_quiets_transport() {
        let directives = default_directives("debug");

        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("tubequota_core=debug"));
        assert!(directives.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}
