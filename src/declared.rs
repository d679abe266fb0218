//! Loading declared configurations from disk.

use anyhow::{Context, Result};
use converge::DeclaredConfiguration;
use std::fs;
use std::path::Path;

/// Read a declared configuration; `.json` files are JSON, anything else TOML.
pub fn load(path: &Path) -> Result<DeclaredConfiguration> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid declared configuration {}", path.display()))
    } else {
        toml::from_str(&content)
            .with_context(|| format!("Invalid declared configuration {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{CachingMode, Priority, ResourceKind, StorageAccountType};
    use tempfile::TempDir;

    #[test]
    fn test_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("web-0.toml");
        fs::write(
            &path,
            r#"
kind = "virtualmachine"
name = "web-0"
location = "westeurope"
size = "Standard_D2s_v5"
priority = "SPOT"
eviction_policy = "Deallocate"
max_bid_price = -1.0

[tags]
env = "prod"

[os_disk]
caching = "readwrite"
storage_account_type = "premium_lrs"
disk_size_gb = 64

[[data_disks]]
lun = 0
caching = "None"
storage_account_type = "StandardSSD_LRS"
disk_size_gb = 128
"#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.kind, ResourceKind::VirtualMachine);
        assert_eq!(config.priority, Some(Priority::Spot));
        let os_disk = config.os_disk.unwrap();
        assert_eq!(os_disk.caching, CachingMode::ReadWrite);
        assert_eq!(os_disk.storage_account_type, StorageAccountType::PremiumLrs);
        assert_eq!(config.data_disks[0].disk_size_gb, 128);
    }

    #[test]
    fn test_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data-0.JSON");
        fs::write(
            &path,
            r#"{"kind":"ManagedDisk","name":"data-0","location":"westeurope","disk_size_gb":64}"#,
        )
        .unwrap();
        assert_eq!(load(&path).unwrap().disk_size_gb, Some(64));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "kind = \"ScaleSet\"\nname = \"a\"\nlocation = \"b\"\nsku = \"x\"\n").unwrap();
        let err = load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("sku"));
    }

    #[test]
    fn test_unknown_enum_value_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "kind = \"Container\"\nname = \"a\"\nlocation = \"b\"\n").unwrap();
        assert!(load(&path).is_err());
    }
}
