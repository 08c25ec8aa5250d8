use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "http://localhost:2379")]
    pub etcd_endpoints: String,

    /// Path of the scrape targets file, rewritten on every fleet change.
    #[envconfig(default = "tgroups.json")]
    pub targets_path: String,

    /// Value of the `job` label attached to the target group.
    #[envconfig(default = "taskfleet-workers")]
    pub job_label: String,
}

impl Config {
    pub fn etcd_endpoint_list(&self) -> Vec<String> {
        self.etcd_endpoints
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let config = Config::init_from_env().expect("default config should parse");
        assert_eq!(config.targets_path, "tgroups.json");
        assert_eq!(config.job_label, "taskfleet-workers");
        assert_eq!(config.etcd_endpoint_list(), vec!["http://localhost:2379"]);
    }
}
