use sidecar::Config;

pub fn run_config(config: &Config) -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&config.effective())?);
    Ok(())
}
