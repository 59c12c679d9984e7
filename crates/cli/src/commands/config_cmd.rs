//! `parley config`: print the default configuration.

use parley_config::AppConfig;

pub fn run() {
    print!("{}", AppConfig::default_toml());
}
