use env_logger::Env;

/// Initialize global logger using `env_logger` with `info` as the default level.
pub fn init() {
    init_with_default("info");
}

/// Initialize global logger; `RUST_LOG` wins over `default_level`.
///
/// Timestamps are in seconds and module paths are left out, so reconstruction
/// logs line up with the simulated clock of a run.
pub fn init_with_default(default_level: &str) {
    let env = Env::default().default_filter_or(default_level);
    // Ignore errors if the logger was already initialized
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_secs()
        .format_module_path(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_twice_is_harmless() {
        super::init();
        super::init_with_default("debug");
        log::info!("logger initialised");
    }
}
