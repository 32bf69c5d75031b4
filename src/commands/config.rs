use nascore_supervisor::SysConfig;
use std::path::Path;

pub(crate) fn cmd_init_config(config_path: &Path, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    SysConfig::default().save(config_path)?;
    println!("Wrote default config to {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_config_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nascore.toml");

        cmd_init_config(&path, false).unwrap();
        assert!(SysConfig::from_file(&path).is_ok());

        std::fs::write(&path, "# hand edited\n").unwrap();
        assert!(cmd_init_config(&path, false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# hand edited\n");

        cmd_init_config(&path, true).unwrap();
        assert_eq!(SysConfig::from_file(&path).unwrap(), SysConfig::default());
    }
}
