use serde::Deserialize;

/// Round-orchestration parameters, loadable via the `config` crate from a
/// TOML file layered with `FL_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_num_rounds")]
    pub num_rounds: u32,
    #[serde(default = "default_min_clients")]
    pub min_clients: u32,
    pub db_url: Option<String>,
}

fn default_num_rounds() -> u32 {
    20
}

fn default_min_clients() -> u32 {
    3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            num_rounds: default_num_rounds(),
            min_clients: default_min_clients(),
            db_url: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load from `config_path` (if present) layered with `FL_*` environment
    /// variables, falling back to `DATABASE_URL` for `db_url` when
    /// `FL_DB_URL` is unset.
    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("num_rounds", default_num_rounds())?
            .set_default("min_clients", default_min_clients())?;

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("FL"));

        let settings = builder.build()?;
        let mut cfg: OrchestratorConfig = settings.try_deserialize()?;

        if cfg.db_url.is_none() {
            cfg.db_url = std::env::var("DATABASE_URL").ok();
        }
        Ok(cfg)
    }
}
