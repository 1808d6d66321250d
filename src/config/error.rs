use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("error parsing config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("error parsing config text: {0}")]
    Text(String),

    #[error("config load rejected: {0} command(s) already exist")]
    CommandsAlreadyExist(usize),

    #[error("script `{0}` references unknown command `{1}`")]
    UnknownCommandTarget(String, String),

    #[error("script `{0}` references unknown group `{1}`")]
    UnknownGroupTarget(String, String),
}
